//! Drive-only practice base.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::ds::RobotMode;
use std::{cell::RefCell, rc::Rc};
use util::time::Clock;

use super::{configure_drive, create_drive, load_auto_trajectory, ContainerContext, ContainerParams};
use crate::{
    cmd::{CommandExt, CommandHandle, PrintCommand, Scheduler},
    drive::{cmds::FollowTrajectory, SwerveDrive, Trajectory},
    input::DriverStation,
    mode::ModeHooks,
    telemetry::LogContext,
};

use super::RobotContainer;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct ZippyContainer {
    drive: Rc<RefCell<SwerveDrive>>,
    ds: DriverStation,
    clock: Clock,
    auto_trajectory: Option<Trajectory>,
    tm: LogContext,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ZippyContainer {
    pub fn new(ctx: &ContainerContext, params: ContainerParams, scheduler: &mut Scheduler) -> Self {
        let drive = create_drive(ctx, params.drive);
        configure_drive(&drive, ctx, &params.sysid, scheduler);

        Self {
            drive,
            ds: ctx.ds.clone(),
            clock: ctx.clock.clone(),
            auto_trajectory: load_auto_trajectory(&ctx.exec),
            tm: LogContext::new("robot"),
        }
    }
}

impl ModeHooks for ZippyContainer {
    fn autonomous_command(&mut self) -> Option<CommandHandle> {
        let cmd = match self.auto_trajectory {
            Some(ref t) => FollowTrajectory::new(&self.drive, &self.ds, &self.clock, t.clone())
                .into_handle(),
            None => PrintCommand::new("No autonomous command configured").into_handle(),
        };
        Some(cmd)
    }

    fn mode_init(&mut self, mode: RobotMode, _scheduler: &mut Scheduler) {
        self.tm.put("mode_entered_s", self.clock.now_s());
        self.tm.put("mode_entered", format!("{:?}", mode));
    }
}

impl RobotContainer for ZippyContainer {
    fn name(&self) -> &str {
        "Zippy"
    }

    fn drive(&self) -> &Rc<RefCell<SwerveDrive>> {
        &self.drive
    }

    fn robot_periodic(&mut self) {
        self.tm.put("match_time", self.ds.match_time_s());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::container::{test::*, RESET_MODULES_BUTTON};
    use comms_if::ds::{Axis, DsPacket, GamepadState};

    #[test]
    fn test_drive_default_and_reset_button() {
        let (ctx, prefs_path) = test_context("zippy");
        let mut sched = Scheduler::new();
        let mut c = ZippyContainer::new(&ctx, test_params(), &mut sched);
        assert_eq!(c.name(), "Zippy");

        // Dashboard reset while disabled persists the offsets
        for m in c.drive().borrow().modules().iter() {
            m.encoder().set_sim_mount_deg(30.0);
        }
        ctx.ds.update(DsPacket {
            mode: RobotMode::Disabled,
            dashboard: vec![(RESET_MODULES_BUTTON.to_string(), true)]
                .into_iter()
                .collect(),
            ..Default::default()
        });
        sched.run();
        assert!((ctx.prefs.borrow().get_f64("FrontLeftOffset") + 30.0).abs() < 1e-9);

        // Joystick driving once enabled
        let mut pad = GamepadState::default();
        pad.set_axis(Axis::LeftY, -1.0);
        ctx.ds.update(DsPacket {
            mode: RobotMode::Teleop,
            gamepads: vec![pad],
            ..Default::default()
        });
        sched.set_disabled(false);
        sched.run();
        assert_eq!(c.drive().borrow().request().kind(), "FieldCentric");

        assert!(c.autonomous_command().is_some());
        std::fs::remove_file(&prefs_path).ok();
    }
}
