//! # Competition robot
//!
//! Swerve drive, two stage elevator, coral manipulator, climber and the fiducial localizer.
//!
//! Driver (port 0):
//!
//! | Control      | Action                      |
//! |--------------|-----------------------------|
//! | Sticks       | Field centric drive         |
//! | Back         | Seed field centric          |
//! | A / B (held) | Extend / retract climber    |
//! | X (held)     | Intake                      |
//! | Y            | Outtake                     |
//! | Right bumper | Slow outtake                |
//! | Left bumper  | Brute outtake               |
//!
//! Operator (port 1):
//!
//! | Control             | Action                           |
//! |---------------------|----------------------------------|
//! | A / B / X / Y       | Go to and hold L1 / L2 / L3 / L4 |
//! | Start               | Home preset                      |
//! | Back                | Coral station preset             |
//! | Left stick          | Home both elevators              |
//! | Right bumper (held) | Manual outer elevator, left Y    |

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::ds::{Axis, Button, DRIVER_PORT, OPERATOR_PORT};
use log::{debug, warn};
use std::{cell::RefCell, rc::Rc};
use util::{
    geom::{Pose2d, Pose3d},
    time::Clock,
};

use super::{
    configure_drive, create_drive, load_auto_trajectory, ContainerContext, ContainerParams,
    RobotContainer,
};
use crate::{
    climber::{self, Climber},
    cmd::{CommandExt, CommandHandle, PrintCommand, Scheduler},
    drive::{cmds::FollowTrajectory, SwerveDrive, Trajectory},
    input::DriverStation,
    localizer::{CameraIo, EstimatedPose, Localizer, SimCameraIo},
    manipulator::{self, Manipulator},
    mode::ModeHooks,
    superstructure::{elevator, Preset, Superstructure},
    sysid::SysIdConfig,
    telemetry::LogContext,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Dashboard button which runs the outer elevator characterisation.
pub const SYSID_ELEVATOR_BUTTON: &str = "SysId Elevator";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct RalphContainer {
    drive: Rc<RefCell<SwerveDrive>>,
    localizer: Rc<RefCell<Localizer>>,
    superstructure: Superstructure,
    manipulator: Rc<RefCell<Manipulator>>,
    climber: Rc<RefCell<Climber>>,

    ds: DriverStation,
    clock: Clock,
    max_estimate_age_s: f64,
    auto_trajectory: Option<Trajectory>,

    num_vision_accepted: u64,
    num_vision_rejected: u64,

    tm: LogContext,
    tm_3d: LogContext,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RalphContainer {
    pub fn new(ctx: &ContainerContext, params: ContainerParams, scheduler: &mut Scheduler) -> Self {
        let drive = create_drive(ctx, params.drive);
        configure_drive(&drive, ctx, &params.sysid, scheduler);

        // ---- LOCALIZER ----

        let layout = Rc::new(params.field_layout);
        let localizer = if ctx.hw.is_sim() {
            let mut l = Localizer::new(
                ctx.vision_hub.clone(),
                &ctx.clock,
                params.vision.estimate_timeout_s,
            );
            for c in params.vision.cameras.iter() {
                let d = drive.clone();
                let io: Box<dyn CameraIo> = Box::new(SimCameraIo::new(
                    &c.name,
                    c.robot_to_camera.to_pose3d(),
                    layout.clone(),
                    params.vision.sim.clone(),
                    &ctx.clock,
                    move || d.borrow().pose(),
                ));
                l.add_camera(io);
            }
            l
        } else {
            Localizer::from_params(
                &params.vision,
                ctx.vision_hub.clone(),
                layout.clone(),
                &ctx.clock,
            )
        };
        let localizer = Rc::new(RefCell::new(localizer));
        scheduler.register_subsystem(&localizer);

        // ---- MECHANISMS ----

        let superstructure =
            Superstructure::new(&ctx.hw, params.superstructure, ctx.exec.cycle_period_s);
        superstructure.register(scheduler);

        let manipulator = Rc::new(RefCell::new(Manipulator::new(&ctx.hw, params.manipulator)));
        scheduler.register_subsystem(&manipulator);

        let climber = Rc::new(RefCell::new(Climber::new(&ctx.hw, params.climber)));
        scheduler.register_subsystem(&climber);

        let container = Self {
            drive,
            localizer,
            superstructure,
            manipulator,
            climber,
            ds: ctx.ds.clone(),
            clock: ctx.clock.clone(),
            max_estimate_age_s: ctx.exec.max_estimate_age_s,
            auto_trajectory: load_auto_trajectory(&ctx.exec),
            num_vision_accepted: 0,
            num_vision_rejected: 0,
            tm: LogContext::new("Robot"),
            tm_3d: LogContext::new("Robot3d"),
        };

        container.configure_bindings(ctx, &params.sysid.elevator, scheduler);
        container
    }

    pub fn superstructure(&self) -> &Superstructure {
        &self.superstructure
    }

    pub fn manipulator(&self) -> &Rc<RefCell<Manipulator>> {
        &self.manipulator
    }

    pub fn climber(&self) -> &Rc<RefCell<Climber>> {
        &self.climber
    }

    pub fn localizer(&self) -> &Rc<RefCell<Localizer>> {
        &self.localizer
    }

    fn configure_bindings(
        &self,
        ctx: &ContainerContext,
        elevator_sysid: &SysIdConfig,
        scheduler: &mut Scheduler,
    ) {
        let driver = ctx.ds.gamepad(DRIVER_PORT);
        let operator = ctx.ds.gamepad(OPERATOR_PORT);

        // ---- DRIVER ----

        scheduler.while_true(
            driver.button(Button::A),
            climber::extend(&self.climber).into_handle(),
        );
        scheduler.while_true(
            driver.button(Button::B),
            climber::retract(&self.climber).into_handle(),
        );

        scheduler.while_true(
            driver.button(Button::X),
            manipulator::intake(&self.manipulator).into_handle(),
        );
        scheduler.on_true(
            driver.button(Button::Y),
            manipulator::outtake(&self.manipulator).into_handle(),
        );
        scheduler.on_true(
            driver.button(Button::RightBumper),
            manipulator::slow_outtake(&self.manipulator).into_handle(),
        );
        scheduler.on_true(
            driver.button(Button::LeftBumper),
            manipulator::brute_outtake(&self.manipulator).into_handle(),
        );

        // ---- OPERATOR ----

        let presets = [
            (Button::A, Preset::L1),
            (Button::B, Preset::L2),
            (Button::X, Preset::L3),
            (Button::Y, Preset::L4),
            (Button::Start, Preset::Home),
            (Button::Back, Preset::CoralStation),
        ];
        for (button, preset) in presets.iter() {
            match self.superstructure.go_to_and_hold(*preset) {
                Ok(cmd) => scheduler.on_true(operator.button(*button), cmd.into_handle()),
                Err(e) => warn!("Could not bind {:?} to {:?}: {}", button, preset, e),
            }
        }

        match self.superstructure.home() {
            Ok(cmd) => scheduler.on_true(operator.button(Button::LeftStick), cmd.into_handle()),
            Err(e) => warn!("Could not bind elevator homing: {}", e),
        }

        let left_y = operator.axis_reader(Axis::LeftY);
        scheduler.while_true(
            operator.button(Button::RightBumper),
            self.superstructure
                .manual(move || -left_y())
                .into_handle(),
        );

        // ---- DASHBOARD ----

        let sysid = elevator::sysid(self.superstructure.outer(), *elevator_sysid, &ctx.clock);
        scheduler.on_true(
            ctx.ds.dashboard_trigger(SYSID_ELEVATOR_BUTTON),
            sysid.all_tests().with_name("ElevatorSysId").into_handle(),
        );
    }

    /// Pass this tick's vision estimates to the drive's pose estimator.
    fn forward_vision(&mut self) {
        let now_s = self.clock.now_s();
        let estimates = self.localizer.borrow().estimated_poses().to_vec();
        let (accepted, rejected) = forward_estimates(
            &mut self.drive.borrow_mut(),
            &estimates,
            now_s,
            self.max_estimate_age_s,
        );
        self.num_vision_accepted += accepted as u64;
        self.num_vision_rejected += rejected as u64;
    }

    fn log_robot_state(&self) {
        let drive = self.drive.borrow();
        let pose = drive.pose();
        let speeds = drive.measured_speeds();

        self.tm.put("match_time", self.ds.match_time_s());
        self.tm.put(
            "chassis_speeds",
            vec![speeds.vx_mps, speeds.vy_mps, speeds.omega_radps],
        );
        self.tm.put(
            "field_relative_heading",
            pose.heading
                .rotate_by(&drive.operator_perspective().inverse())
                .degrees(),
        );
        self.tm.put("vision_accepted", self.num_vision_accepted as f64);
        self.tm.put("vision_rejected", self.num_vision_rejected as f64);
        self.tm.put(
            "vision_recent",
            self.localizer.borrow().has_had_recent_estimate(),
        );

        let elevator_height_m = self
            .superstructure
            .state()
            .map(|s| s.inner_m + s.outer_m)
            .unwrap_or(0.0);

        for (name, component) in component_poses(&pose, elevator_height_m).iter() {
            self.tm_3d.put_struct(name, component);
        }
    }
}

impl ModeHooks for RalphContainer {
    fn autonomous_command(&mut self) -> Option<CommandHandle> {
        let cmd = match self.auto_trajectory {
            Some(ref t) => FollowTrajectory::new(&self.drive, &self.ds, &self.clock, t.clone())
                .into_handle(),
            None => PrintCommand::new("No autonomous command configured").into_handle(),
        };
        Some(cmd)
    }
}

impl RobotContainer for RalphContainer {
    fn name(&self) -> &str {
        "Ralph"
    }

    fn drive(&self) -> &Rc<RefCell<SwerveDrive>> {
        &self.drive
    }

    fn robot_periodic(&mut self) {
        self.forward_vision();

        let pose = self.drive.borrow().pose();
        self.localizer.borrow_mut().update_with_reference_pose(&pose);

        self.superstructure.log_state();
        self.log_robot_state();
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Add every estimate no older than `max_age_s` to the drive. Returns the number accepted and
/// rejected.
fn forward_estimates(
    drive: &mut SwerveDrive,
    estimates: &[EstimatedPose],
    now_s: f64,
    max_age_s: f64,
) -> (usize, usize) {
    let mut accepted = 0;
    let mut rejected = 0;

    for e in estimates.iter() {
        if now_s - e.timestamp_s > max_age_s {
            debug!(
                "Estimate from {} is {:.3} s old, ignored",
                e.camera,
                now_s - e.timestamp_s
            );
            rejected += 1;
            continue;
        }

        match drive.add_vision_measurement(&e.pose, e.timestamp_s) {
            Ok(_) => accepted += 1,
            Err(err) => {
                debug!("Estimate from {} rejected: {}", e.camera, err);
                rejected += 1;
            }
        }
    }

    (accepted, rejected)
}

/// Poses of the robot's visualisation components, in the order the model expects.
fn component_poses(robot: &Pose2d, elevator_height_m: f64) -> [(String, Pose3d); 5] {
    let base = Pose3d::from_pose2d(robot);
    let part = |x, y, z, pitch_deg: f64, yaw_deg: f64| {
        base.transform_by(&Pose3d::from_xyz_rpy(
            x,
            y,
            z,
            0.0,
            pitch_deg.to_radians(),
            yaw_deg.to_radians(),
        ))
    };

    [
        (String::from("Robot"), base),
        (String::from("component_0"), base),
        (String::from("component_1"), part(0.27, 0.05, 0.53, 0.0, 270.0)),
        (String::from("component_2"), part(-1.52, -0.4, -0.02, 0.0, 90.0)),
        (
            String::from("component_3"),
            part(0.31, -0.07, elevator_height_m, 285.0, 270.0),
        ),
    ]
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{container::test::*, hal::ControlRequest};
    use comms_if::ds::{DsPacket, GamepadState, RobotMode};
    use util::geom::Rotation2d;

    fn press(ds: &DriverStation, port: usize, button: Button) {
        let mut pads = vec![GamepadState::default(), GamepadState::default()];
        pads[port].set_button(button, true);
        ds.update(DsPacket {
            mode: RobotMode::Teleop,
            gamepads: pads,
            ..Default::default()
        });
    }

    fn release(ds: &DriverStation) {
        ds.update(DsPacket {
            mode: RobotMode::Teleop,
            ..Default::default()
        });
    }

    #[test]
    fn test_sim_construction() {
        let (ctx, prefs_path) = test_context("ralph_build");
        let mut sched = Scheduler::new();
        let c = RalphContainer::new(&ctx, test_params(), &mut sched);

        assert_eq!(c.name(), "Ralph");
        assert_eq!(
            c.localizer().borrow().num_cameras(),
            test_params().vision.cameras.len()
        );
        std::fs::remove_file(&prefs_path).ok();
    }

    #[test]
    fn test_operator_preset_binding() {
        let (ctx, prefs_path) = test_context("ralph_preset");
        let mut sched = Scheduler::new();
        let c = RalphContainer::new(&ctx, test_params(), &mut sched);
        sched.set_disabled(false);

        press(&ctx.ds, OPERATOR_PORT, Button::A);
        ctx.clock.advance(0.02);
        sched.run();
        assert_eq!(c.superstructure().target(), Some(Preset::L1));

        release(&ctx.ds);
        ctx.clock.advance(0.02);
        sched.run();
        // On true bindings keep running after release
        assert_eq!(c.superstructure().target(), Some(Preset::L1));
        assert!(
            (c.superstructure().outer().borrow().target_position_m()
                - c.superstructure().presets().l1.outer_m)
                .abs()
                < 1e-9
        );
        std::fs::remove_file(&prefs_path).ok();
    }

    #[test]
    fn test_driver_climber_binding() {
        let (ctx, prefs_path) = test_context("ralph_climb");
        let mut sched = Scheduler::new();
        let c = RalphContainer::new(&ctx, test_params(), &mut sched);
        sched.set_disabled(false);

        press(&ctx.ds, DRIVER_PORT, Button::A);
        ctx.clock.advance(0.02);
        sched.run();
        match c.climber().borrow().motor().control() {
            ControlRequest::DutyCycle { output } => assert!(output > 0.0),
            other => panic!("unexpected climber control {:?}", other),
        }

        // While true bindings cancel on release
        release(&ctx.ds);
        ctx.clock.advance(0.02);
        sched.run();
        assert_eq!(c.climber().borrow().motor().control(), ControlRequest::Neutral);
        std::fs::remove_file(&prefs_path).ok();
    }

    #[test]
    fn test_vision_forwarding_respects_age() {
        let (ctx, prefs_path) = test_context("ralph_vision");
        let mut drive = SwerveDrive::new(
            &ctx.hw,
            test_params().drive,
            ctx.ds.clone(),
            ctx.exec.cycle_period_s,
        );
        ctx.clock.advance(0.02);
        drive.sample_odometry();

        let now_s = ctx.clock.now_s();
        let estimate = |timestamp_s| EstimatedPose {
            pose: Pose2d::new(0.1, 0.0, Rotation2d::default()),
            timestamp_s,
            camera: String::from("front"),
            tag_ids: vec![18],
        };
        let estimates = vec![estimate(now_s - 1.0), estimate(now_s)];

        let (accepted, rejected) =
            forward_estimates(&mut drive, &estimates, now_s, ctx.exec.max_estimate_age_s);
        assert_eq!(accepted, 1);
        assert_eq!(rejected, 1);
        std::fs::remove_file(&prefs_path).ok();
    }

    #[test]
    fn test_auto_without_trajectory_prints() {
        let (ctx, prefs_path) = test_context("ralph_auto");
        let mut sched = Scheduler::new();
        let mut c = RalphContainer::new(&ctx, test_params(), &mut sched);

        let cmd = c.autonomous_command().unwrap();
        assert_eq!(cmd.name(), "Print");
        std::fs::remove_file(&prefs_path).ok();
    }

    #[test]
    fn test_component_poses() {
        let robot = Pose2d::new(2.0, 1.0, Rotation2d::default());
        let poses = component_poses(&robot, 0.4);

        assert_eq!(poses[0].0, "Robot");
        let t = poses[4].1.translation();
        assert!((t[0] - 2.31).abs() < 1e-9);
        assert!((t[1] - 0.93).abs() < 1e-9);
        assert!((t[2] - 0.4).abs() < 1e-9);
    }
}
