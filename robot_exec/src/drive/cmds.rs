//! Commands acting on the swerve drive

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::ds::{Alliance, Axis};
use log::{info, warn};
use std::{cell::RefCell, collections::BTreeSet, rc::Rc};
use util::{geom::Rotation2d, time::Clock, time::Timer};

use super::{SwerveDrive, SwerveRequest, Trajectory, NUM_MODULES};
use crate::{
    cmd::{
        Command, CommandError, CommandExt, CommandResult, InstantCommand, RunCommand,
        SequentialGroup, Subsystem, SubsystemExt, SubsystemId, Wrapped,
    },
    input::{DriverStation, Gamepad},
    prefs::Preferences,
    sysid::{SysIdConfig, SysIdMechanism, SysIdParams, SysIdRoutine},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Follows a trajectory against a command timer, finishing at the final sample time.
///
/// The trajectory is authored from the blue alliance origin and is mirrored when the driver
/// station reports the red alliance at initialisation.
pub struct FollowTrajectory {
    drive: Rc<RefCell<SwerveDrive>>,
    drive_id: SubsystemId,
    ds: DriverStation,
    trajectory: Trajectory,
    active: Option<Trajectory>,
    timer: Timer,
    reset_pose: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl FollowTrajectory {
    pub fn new(
        drive: &Rc<RefCell<SwerveDrive>>,
        ds: &DriverStation,
        clock: &Clock,
        trajectory: Trajectory,
    ) -> Self {
        Self {
            drive_id: drive.borrow().id(),
            drive: drive.clone(),
            ds: ds.clone(),
            trajectory,
            active: None,
            timer: Timer::new(clock),
            reset_pose: true,
        }
    }

    /// Whether to reset the drive's pose to the first sample when starting, on by default.
    pub fn resetting_pose(mut self, reset_pose: bool) -> Self {
        self.reset_pose = reset_pose;
        self
    }
}

impl Command for FollowTrajectory {
    fn name(&self) -> String {
        format!("FollowTrajectory({})", self.trajectory.name())
    }

    fn requirements(&self) -> BTreeSet<SubsystemId> {
        let mut r = BTreeSet::new();
        r.insert(self.drive_id);
        r
    }

    fn initialize(&mut self) -> CommandResult {
        let trajectory = match self.ds.alliance() {
            Some(Alliance::Red) => self.trajectory.for_alliance(Alliance::Red),
            _ => self.trajectory.clone(),
        };

        let mut drive = self.drive.borrow_mut();
        drive.reset_follower();
        if self.reset_pose {
            drive.reset_pose(trajectory.initial_sample().pose());
        }

        info!(
            "Following trajectory {} ({:.2} s)",
            trajectory.name(),
            trajectory.total_time_s()
        );

        self.active = Some(trajectory);
        self.timer.restart();
        Ok(())
    }

    fn execute(&mut self) -> CommandResult {
        let trajectory = self.active.as_ref().ok_or_else(|| {
            CommandError::Failed(String::from("trajectory executed before initialisation"))
        })?;

        let sample = trajectory.sample(self.timer.get_s());
        self.drive.borrow_mut().follow_trajectory(&sample);
        Ok(())
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        Ok(self.timer.has_elapsed(self.trajectory.total_time_s()))
    }

    fn end(&mut self, interrupted: bool) -> CommandResult {
        self.timer.stop();
        self.active = None;
        if interrupted {
            warn!("Trajectory {} interrupted", self.trajectory.name());
        }
        self.drive.borrow_mut().apply_request(SwerveRequest::Idle);
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Field centric driving from the driver's sticks, scaled by the drive's maximum speeds.
///
/// Forward on the left stick (negative Y) drives away from the driver, left on the left stick
/// strafes left and left on the right stick turns counter-clockwise.
pub fn joystick_drive(drive: &Rc<RefCell<SwerveDrive>>, driver: &Gamepad) -> RunCommand {
    let left_y = driver.axis_reader(Axis::LeftY);
    let left_x = driver.axis_reader(Axis::LeftX);
    let right_x = driver.axis_reader(Axis::RightX);

    drive.run("JoystickDrive", move |d| {
        let request = SwerveRequest::field_centric(
            -left_y() * d.max_speed_mps(),
            -left_x() * d.max_speed_mps(),
            -right_x() * d.max_rotation_radps(),
        );
        d.apply_request(request);
        Ok(())
    })
}

/// Apply `request` every tick until interrupted.
pub fn apply_request_cmd(
    drive: &Rc<RefCell<SwerveDrive>>,
    name: &str,
    request: SwerveRequest,
) -> RunCommand {
    drive.run(name, move |d| {
        d.apply_request(request.clone());
        Ok(())
    })
}

pub fn seed_field_centric_cmd(drive: &Rc<RefCell<SwerveDrive>>) -> Wrapped<InstantCommand> {
    drive
        .run_once("SeedFieldCentric", |d| {
            d.seed_field_centric();
            Ok(())
        })
        .ignoring_disable(true)
}

/// Zero every module at its current heading and persist the new offsets.
///
/// Runs while disabled, since the wheels are aligned by hand with the robot disabled.
pub fn reset_modules_cmd(
    drive: &Rc<RefCell<SwerveDrive>>,
    prefs: &Rc<RefCell<Preferences>>,
) -> Wrapped<InstantCommand> {
    let prefs = prefs.clone();

    drive
        .run_once("ResetSwerveModules", move |d| {
            let offsets = d.reset_module_offsets([Rotation2d::default(); NUM_MODULES])?;

            let mut prefs = prefs.borrow_mut();
            for (m, o) in d.params().modules.iter().zip(offsets.iter()) {
                prefs
                    .set_f64(&m.offset_pref_key, *o)
                    .map_err(|e| CommandError::Failed(format!("{}", e)))?;
            }
            Ok(())
        })
        .ignoring_disable(true)
}

/// Characterise the drive motors, sampled from the first module.
pub fn sysid_translation(
    drive: &Rc<RefCell<SwerveDrive>>,
    config: SysIdConfig,
    clock: &Clock,
) -> SysIdRoutine {
    let (d_drive, d_sample) = (drive.clone(), drive.clone());
    let mech = SysIdMechanism::new(
        "drive_translation",
        drive.borrow().id(),
        move |volts| {
            d_drive
                .borrow_mut()
                .apply_request(SwerveRequest::SysIdTranslation { volts });
            Ok(())
        },
        move || {
            let d = d_sample.borrow();
            let m = &d.modules()[0];
            Some((m.position().ok()?.distance_m, m.state().ok()?.speed_mps))
        },
    );
    SysIdRoutine::new(config, mech, clock)
}

/// Characterise the steer motors, sampled from the first module's heading.
pub fn sysid_steer(
    drive: &Rc<RefCell<SwerveDrive>>,
    config: SysIdConfig,
    clock: &Clock,
) -> SysIdRoutine {
    let (d_drive, d_sample) = (drive.clone(), drive.clone());
    let heading_prev: Rc<RefCell<Option<(f64, f64)>>> = Rc::new(RefCell::new(None));
    let clock_sample = clock.clone();
    let mech = SysIdMechanism::new(
        "drive_steer",
        drive.borrow().id(),
        move |volts| {
            d_drive
                .borrow_mut()
                .apply_request(SwerveRequest::SysIdSteer { volts });
            Ok(())
        },
        move || {
            let heading = d_sample.borrow().modules()[0].heading().ok()?.radians();
            let now = clock_sample.now_s();

            // Rate from successive samples, wrapped across the +/-pi seam
            let mut prev = heading_prev.borrow_mut();
            let rate = match *prev {
                Some((h, t)) if now > t => {
                    let d = (heading - h + std::f64::consts::PI)
                        .rem_euclid(2.0 * std::f64::consts::PI)
                        - std::f64::consts::PI;
                    d / (now - t)
                }
                _ => 0.0,
            };
            *prev = Some((heading, now));
            Some((heading, rate))
        },
    );
    SysIdRoutine::new(config, mech, clock)
}

/// Characterise rotation of the whole chassis. The voltage is applied as a rotation rate of one
/// radian per second per volt.
pub fn sysid_rotation(
    drive: &Rc<RefCell<SwerveDrive>>,
    config: SysIdConfig,
    clock: &Clock,
) -> SysIdRoutine {
    let (d_drive, d_sample) = (drive.clone(), drive.clone());
    let mech = SysIdMechanism::new(
        "drive_rotation",
        drive.borrow().id(),
        move |volts| {
            d_drive
                .borrow_mut()
                .apply_request(SwerveRequest::SysIdRotation { volts });
            Ok(())
        },
        move || {
            let d = d_sample.borrow();
            let yaw = d.gyro().yaw().ok()?.radians();
            let rate = d.gyro().rate_degps().ok()?.to_radians();
            Some((yaw, rate))
        },
    );
    SysIdRoutine::new(config, mech, clock)
}

/// Every drive characterisation test: translation, then steer, then rotation.
pub fn sysid_all(
    drive: &Rc<RefCell<SwerveDrive>>,
    params: &SysIdParams,
    clock: &Clock,
) -> Wrapped<SequentialGroup> {
    sysid_translation(drive, params.drive_translation, clock)
        .all_tests()
        .then(sysid_steer(drive, params.drive_steer, clock).all_tests())
        .then(sysid_rotation(drive, params.drive_rotation, clock).all_tests())
        .with_name("DriveSysId")
}

/// Read each module's saved offset from the preferences and apply it.
pub fn load_module_offsets(drive: &mut SwerveDrive, prefs: &Preferences) {
    let mut offsets = [0.0; NUM_MODULES];
    for (o, m) in offsets.iter_mut().zip(drive.params().modules.iter()) {
        *o = prefs.get_f64(&m.offset_pref_key);
    }
    info!("Loaded module offsets {:?} deg", offsets);
    drive.set_module_offsets(offsets);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{cmd::Scheduler, hal::Hardware};
    use comms_if::ds::{DsPacket, GamepadState, RobotMode, DRIVER_PORT};
    use std::path::PathBuf;

    use super::super::{DriveParams, TrajectorySample};

    fn test_params() -> DriveParams {
        toml::from_str(include_str!("../../../params/drive.toml")).unwrap()
    }

    fn setup() -> (Rc<RefCell<SwerveDrive>>, Scheduler, DriverStation, Clock) {
        let clock = Clock::manual();
        let hw = Hardware::sim(&clock);
        let ds = DriverStation::new();
        let drive = Rc::new(RefCell::new(SwerveDrive::new(
            &hw,
            test_params(),
            ds.clone(),
            0.02,
        )));
        let mut scheduler = Scheduler::new();
        scheduler.register_subsystem(&drive);
        (drive, scheduler, ds, clock)
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("drive_cmds_{}_{}.json", name, std::process::id()))
    }

    #[test]
    fn test_reset_modules_persists_offsets() {
        let (drive, mut scheduler, _ds, _clock) = setup();
        let path = temp_path("reset");
        let prefs = Rc::new(RefCell::new(Preferences::load(&path).unwrap()));

        let raw = [10.0, -10.0, 170.0, -170.0];
        for (m, r) in drive.borrow().modules().iter().zip(raw.iter()) {
            m.encoder().set_sim_mount_deg(*r);
        }

        // Scheduler starts disabled, the reset must still run
        let cmd = reset_modules_cmd(&drive, &prefs).into_handle();
        scheduler.schedule(&cmd).unwrap();
        scheduler.run();

        let p = prefs.borrow();
        assert!((p.get_f64("FrontLeftOffset") + 10.0).abs() < 1e-9);
        assert!((p.get_f64("FrontRightOffset") - 10.0).abs() < 1e-9);
        assert!((p.get_f64("BackLeftOffset") + 170.0).abs() < 1e-9);
        assert!((p.get_f64("BackRightOffset") - 170.0).abs() < 1e-9);

        // Loading into a fresh drive gives the same headings
        let mut fresh = SwerveDrive::new(
            &Hardware::sim(&Clock::manual()),
            test_params(),
            DriverStation::new(),
            0.02,
        );
        for (m, r) in fresh.modules().iter().zip(raw.iter()) {
            m.encoder().set_sim_mount_deg(*r);
        }
        load_module_offsets(&mut fresh, &p);
        for m in fresh.modules().iter() {
            assert!(m.heading().unwrap().degrees().abs() < 1e-9);
        }

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_joystick_drive_scales_sticks() {
        let (drive, mut scheduler, ds, _clock) = setup();

        let mut pad = GamepadState::default();
        pad.set_axis(Axis::LeftY, -1.0);
        pad.set_axis(Axis::RightX, 0.5);
        ds.update(DsPacket {
            mode: RobotMode::Teleop,
            alliance: Some(Alliance::Blue),
            gamepads: vec![pad],
            ..Default::default()
        });

        let cmd = joystick_drive(&drive, &ds.gamepad(DRIVER_PORT)).into_handle();
        scheduler.set_disabled(false);
        scheduler.schedule(&cmd).unwrap();
        scheduler.run();

        match drive.borrow().request() {
            SwerveRequest::FieldCentric {
                vx_mps,
                vy_mps,
                omega_radps,
                ..
            } => {
                assert!((vx_mps - 3.0).abs() < 1e-9);
                assert_eq!(*vy_mps, 0.0);
                assert!((omega_radps + 2.5).abs() < 1e-9);
            }
            r => panic!("unexpected request {:?}", r),
        };
    }

    #[test]
    fn test_follow_trajectory_finishes_at_end() {
        let (drive, mut scheduler, ds, clock) = setup();
        drive
            .borrow_mut()
            .reset_module_offsets([Rotation2d::default(); NUM_MODULES])
            .unwrap();

        let sample = |t_s: f64, x_m: f64| TrajectorySample {
            t_s,
            x_m,
            y_m: 1.0,
            heading_rad: 0.0,
            vx_mps: 0.5,
            vy_mps: 0.0,
            omega_radps: 0.0,
        };
        let trajectory = Trajectory::new("line", vec![sample(0.0, 1.0), sample(1.0, 1.5)]).unwrap();

        let cmd = FollowTrajectory::new(&drive, &ds, &clock, trajectory).into_handle();
        scheduler.set_disabled(false);
        scheduler.schedule(&cmd).unwrap();

        // Pose reset to the first sample on start
        let start = drive.borrow().pose();
        assert!((start.x_m - 1.0).abs() < 1e-9 && (start.y_m - 1.0).abs() < 1e-9);

        let mut ticks = 0;
        while scheduler.is_scheduled(&cmd) && ticks < 100 {
            scheduler.run();
            clock.advance(0.02);
            drive.borrow().sample_odometry();
            ticks += 1;
        }
        assert!(ticks >= 50 && ticks < 100, "{}", ticks);

        let end = drive.borrow().pose();
        assert!((end.x_m - 1.5).abs() < 0.1, "{:?}", end);
        assert_eq!(drive.borrow().request().kind(), "Idle");
    }

    #[test]
    fn test_sysid_translation_drives_modules() {
        let (drive, mut scheduler, _ds, clock) = setup();
        let config = SysIdConfig {
            ramp_rate_vps: 1.0,
            step_voltage_v: 4.0,
            timeout_s: 10.0,
        };

        let cmd = sysid_translation(&drive, config, &clock)
            .dynamic(crate::sysid::SysIdDirection::Reverse)
            .into_handle();
        scheduler.set_disabled(false);
        scheduler.schedule(&cmd).unwrap();
        clock.advance(0.02);
        scheduler.run();

        assert_eq!(
            *drive.borrow().request(),
            SwerveRequest::SysIdTranslation { volts: -4.0 }
        );

        scheduler.cancel(&cmd);
        assert_eq!(
            *drive.borrow().request(),
            SwerveRequest::SysIdTranslation { volts: 0.0 }
        );
    }
}
