//! # Robot
//!
//! One main tick of the robot:
//!
//! 1. Take the driver station packets received since the last tick.
//! 2. Make the robot safe if the driver station has timed out or the pose estimator has failed.
//! 3. Apply the requested mode, forced to Disabled while safe.
//! 4. Apply tunable updates.
//! 5. Run the scheduler, then the container's periodic.
//! 6. Put every motor in neutral while disabled.
//! 7. Flush telemetry.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::ds::{DsPacket, RobotMode};
use log::{error, info, warn};

use crate::{
    cmd::Scheduler,
    container::{self, ContainerContext, ContainerParams, RobotContainer, Variant},
    data_store::{DataStore, SafeModeCause},
    mode::ModeController,
    telemetry::{self, LogContext},
    tuning::TuningManager,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct Robot {
    ctx: ContainerContext,
    container: Box<dyn RobotContainer>,
    scheduler: Scheduler,
    modes: ModeController,
    tuning: TuningManager,
    store: DataStore,
    tm: LogContext,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RobotError {
    #[error("The pose estimator has failed and the robot cannot continue")]
    FatalEstimator,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Robot {
    /// Build the container for `variant` and wire it into a fresh scheduler.
    pub fn new(ctx: ContainerContext, variant: Variant, params: ContainerParams) -> Self {
        let mut scheduler = Scheduler::new();
        let container = container::build(variant, &ctx, params, &mut scheduler);

        let mut tuning = TuningManager::new();
        container::register_drive_tunables(container.drive(), &mut tuning);

        info!(
            "{} container built, {} tunables registered",
            container.name(),
            tuning.num_tunables()
        );

        Self {
            ctx,
            container,
            scheduler,
            modes: ModeController::new(),
            tuning,
            store: DataStore::default(),
            tm: LogContext::new("Robot"),
        }
    }

    pub fn container(&self) -> &dyn RobotContainer {
        self.container.as_ref()
    }

    pub fn context(&self) -> &ContainerContext {
        &self.ctx
    }

    pub fn data_store(&self) -> &DataStore {
        &self.store
    }

    pub fn mode(&self) -> RobotMode {
        self.modes.mode()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Start the drive's odometry thread.
    pub fn start_odometry(&self) {
        self.container
            .drive()
            .borrow_mut()
            .start_odometry(self.ctx.exec.odometry_rate_hz);
    }

    pub fn stop_odometry(&self) {
        self.container.drive().borrow_mut().stop_odometry();
    }

    /// Run one main tick with the packets received since the last one, oldest first.
    pub fn tick(&mut self, packets: Vec<DsPacket>) -> Result<(), RobotError> {
        let cycle_frequency_hz = 1.0 / self.ctx.exec.cycle_period_s;
        self.store
            .cycle_start(cycle_frequency_hz, self.ctx.clock.now_s());

        // ---- INPUT ----

        for p in packets {
            self.ctx.ds.update(p);
            self.store.ds_packet_received();
        }

        // ---- SAFETY ----

        if self.store.ds_connected(self.ctx.exec.ds_timeout_s) {
            if let Err(root) = self.store.make_unsafe(SafeModeCause::DsNotConnected) {
                if self.store.is_1_hz_cycle {
                    warn!("Driver station connected but robot still safe: {:?}", root);
                }
            }
        } else {
            if !self.store.safe {
                error!("Driver station connection lost");
            }
            self.ctx.ds.set_disconnected();
            self.store.make_safe(SafeModeCause::DsNotConnected);
        }

        if self.container.drive().borrow().is_fatal() {
            self.store.make_safe(SafeModeCause::FatalEstimator);
            self.ctx.hw.stop_all();
            self.stop_odometry();
            return Err(RobotError::FatalEstimator);
        }

        // ---- MODE ----

        let requested = if self.store.safe {
            RobotMode::Disabled
        } else {
            self.ctx.ds.mode()
        };
        self.modes
            .update(requested, self.container.as_mut(), &mut self.scheduler);

        self.tuning.update_all(&self.ctx.ds.take_tunable_updates());

        // ---- COMMANDS ----

        self.scheduler.run();
        self.container.robot_periodic();

        if !requested.is_enabled() {
            self.ctx.hw.stop_all();
        }

        // ---- TELEMETRY ----

        self.tm.put("safe", self.store.safe);
        if let Some(cause) = self.store.safe_cause {
            self.tm.put("safe_cause", format!("{:?}", cause));
        }
        self.tm.put("num_cycles", self.store.num_cycles as f64);
        telemetry::flush();

        self.store.cycle_end();
        Ok(())
    }

    /// Record a cycle overrun reported by the loop driver.
    pub fn record_overrun(&mut self, overrun_s: f64) {
        self.store.num_consec_cycle_overruns += 1;
        warn!(
            "Cycle overran by {:.3} s ({} consecutive)",
            overrun_s, self.store.num_consec_cycle_overruns
        );
    }

    pub fn clear_overruns(&mut self) {
        self.store.num_consec_cycle_overruns = 0;
    }

    /// Put every motor in neutral and stop the odometry thread.
    pub fn shutdown(&mut self) {
        self.scheduler.cancel_all();
        self.ctx.hw.stop_all();
        self.stop_odometry();
        info!("Robot shut down");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        container::test::{test_context, test_params},
        hal::ControlRequest,
    };
    use comms_if::ds::{Button, GamepadState, DRIVER_PORT};

    fn sim_robot(name: &str) -> (Robot, std::path::PathBuf) {
        let (ctx, prefs_path) = test_context(name);
        (Robot::new(ctx, Variant::Ralph, test_params()), prefs_path)
    }

    fn teleop_with(button: Option<Button>) -> DsPacket {
        let mut pad = GamepadState::default();
        if let Some(b) = button {
            pad.set_button(b, true);
        }
        DsPacket {
            mode: RobotMode::Teleop,
            gamepads: vec![pad],
            ..Default::default()
        }
    }

    fn step(robot: &mut Robot, packets: Vec<DsPacket>) {
        robot.context().clock.advance(0.02);
        robot.tick(packets).unwrap();
    }

    #[test]
    fn test_safe_until_ds_connects() {
        let (mut robot, prefs_path) = sim_robot("robot_safe");

        step(&mut robot, vec![]);
        assert!(robot.data_store().safe);
        assert_eq!(robot.mode(), RobotMode::Disabled);

        step(&mut robot, vec![teleop_with(None)]);
        assert!(!robot.data_store().safe);
        assert_eq!(robot.mode(), RobotMode::Teleop);
        std::fs::remove_file(&prefs_path).ok();
    }

    #[test]
    fn test_ds_timeout_disables_and_stops_motors() {
        let (mut robot, prefs_path) = sim_robot("robot_timeout");
        step(&mut robot, vec![teleop_with(None)]);
        step(&mut robot, vec![teleop_with(Some(Button::A))]);

        assert!(robot.context().ds.button(DRIVER_PORT, Button::A));

        // Packets stop arriving, the timeout is 0.5 s
        for _ in 0..30 {
            step(&mut robot, vec![]);
        }

        assert!(robot.data_store().safe);
        assert_eq!(
            robot.data_store().safe_cause,
            Some(SafeModeCause::DsNotConnected)
        );
        assert_eq!(robot.mode(), RobotMode::Disabled);
        assert!(!robot.context().ds.button(DRIVER_PORT, Button::A));
        std::fs::remove_file(&prefs_path).ok();
    }

    #[test]
    fn test_disabled_stops_everything_each_tick() {
        let (mut robot, prefs_path) = sim_robot("robot_disabled");

        let disabled = DsPacket {
            mode: RobotMode::Disabled,
            ..Default::default()
        };
        step(&mut robot, vec![disabled.clone()]);

        // Something drives a motor behind the scheduler's back
        let (drive, motor) = {
            let d = robot.container().drive().clone();
            let m = d.borrow().modules()[0].drive_motor().clone();
            (d, m)
        };
        motor
            .set_control(ControlRequest::DutyCycle { output: 0.5 })
            .unwrap();

        step(&mut robot, vec![disabled]);
        assert_eq!(motor.control(), ControlRequest::Neutral);
        assert!(!drive.borrow().is_fatal());
        std::fs::remove_file(&prefs_path).ok();
    }

    #[test]
    fn test_auto_runs_then_teleop() {
        let (mut robot, prefs_path) = sim_robot("robot_auto");

        step(
            &mut robot,
            vec![DsPacket {
                mode: RobotMode::Autonomous,
                ..Default::default()
            }],
        );
        assert_eq!(robot.mode(), RobotMode::Autonomous);

        step(&mut robot, vec![teleop_with(None)]);
        assert_eq!(robot.mode(), RobotMode::Teleop);
        assert_eq!(robot.data_store().num_cycles, 2);
        std::fs::remove_file(&prefs_path).ok();
    }

    #[test]
    fn test_tunables_from_every_packet_in_a_tick() {
        use comms_if::{ds::TunableUpdate, tm::TmValue};

        let (mut robot, prefs_path) = sim_robot("robot_tunables");
        step(&mut robot, vec![teleop_with(None)]);

        let mut tuned = teleop_with(None);
        tuned.tunables.push(TunableUpdate {
            key: String::from("Drive/TranslationKd"),
            value: TmValue::Double(0.25),
        });
        step(&mut robot, vec![tuned, teleop_with(None)]);

        let (translation, _) = robot.container().drive().borrow().follower_gains();
        assert_eq!(translation.kd, 0.25);
        std::fs::remove_file(&prefs_path).ok();
    }
}

