//! # Swerve drive
//!
//! Four independently steered modules driven by latched [`SwerveRequest`]s, with a pose estimator
//! fed at a high rate by a separate odometry thread and corrected by back-dated vision
//! measurements.
//!
//! The drive is used from the main thread only. The odometry thread holds its own clones of the
//! device handles and shares the estimator through a mutex.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod cmds;
mod estimator;
mod kinematics;
mod module;
mod odometry;
mod params;
mod pid;
mod request;
mod trajectory;

pub use estimator::{EstimatorError, ModulePositions, PoseEstimator, StdDevs};
pub use kinematics::{ChassisSpeeds, SwerveKinematics, SwerveModulePosition, SwerveModuleState};
pub use module::{DriveOutput, ModuleStatus, SwerveModule};
pub use odometry::{sample_odometry, OdometrySource, OdometryStats, OdometryThread};
pub use params::{DriveParams, ModuleParams};
pub use pid::{HolonomicFollower, PidController, PidGains};
pub use request::{ForwardPerspective, SwerveRequest};
pub use trajectory::{Trajectory, TrajectoryError, TrajectorySample};

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::ds::RobotMode;
use log::{info, warn};
use std::sync::{Arc, Mutex};
use util::{
    geom::{Pose2d, Rotation2d},
    time::Clock,
};

use crate::{
    cmd::{Subsystem, SubsystemId},
    field::operator_perspective,
    hal::{Gyro, HalError, Hardware},
    input::DriverStation,
    telemetry::{LogContext, Loggable},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// The number of swerve modules on the chassis.
pub const NUM_MODULES: usize = 4;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The swerve drive subsystem.
pub struct SwerveDrive {
    id: SubsystemId,
    params: DriveParams,
    clock: Clock,
    ds: DriverStation,

    /// Period of the main tick, requests are discretised over it.
    ///
    /// Units: seconds
    tick_period_s: f64,

    modules: [SwerveModule; NUM_MODULES],
    gyro: Gyro,
    kinematics: SwerveKinematics,

    estimator: Arc<Mutex<PoseEstimator>>,
    odom_stats: Arc<OdometryStats>,
    odometry: Option<OdometryThread>,

    follower: HolonomicFollower,

    request: SwerveRequest,

    /// Module headings last commanded, held while the chassis is stopped
    target_angles: [Rotation2d; NUM_MODULES],

    operator_perspective: Rotation2d,
    perspective_applied: bool,

    /// Pose as of the last periodic, returned if the estimator can't be read
    last_pose: Pose2d,

    num_request_faults: u64,

    tm: LogContext,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SwerveDrive {
    /// Create the drive. Odometry is not sampled until [`SwerveDrive::start_odometry`] is called
    /// or [`SwerveDrive::sample_odometry`] is called directly.
    pub fn new(hw: &Hardware, params: DriveParams, ds: DriverStation, tick_period_s: f64) -> Self {
        let circumference_m = params.wheel_circumference_m();

        let build = |i: usize| {
            SwerveModule::new(
                hw,
                &params.modules[i],
                &params.drive_motor,
                &params.steer_motor,
                circumference_m,
            )
        };
        let modules = [build(0), build(1), build(2), build(3)];

        let kinematics = SwerveKinematics::new(params.module_locations_m());
        let estimator = PoseEstimator::new(
            kinematics.clone(),
            params.odometry_std_devs,
            params.vision_std_devs,
            params.estimator_horizon_s,
            params.vision_max_jump_m,
        );

        let follower =
            HolonomicFollower::new(params.translation_pid, params.rotation_pid, tick_period_s);

        let mut drive = Self {
            id: SubsystemId::next(),
            clock: hw.clock().clone(),
            ds,
            tick_period_s,
            gyro: hw.gyro("Drive/gyro"),
            modules,
            kinematics,
            estimator: Arc::new(Mutex::new(estimator)),
            odom_stats: Arc::new(OdometryStats::default()),
            odometry: None,
            follower,
            request: SwerveRequest::Idle,
            target_angles: [Rotation2d::default(); NUM_MODULES],
            operator_perspective: Rotation2d::default(),
            perspective_applied: false,
            last_pose: Pose2d::default(),
            num_request_faults: 0,
            tm: LogContext::new("Drive"),
            params,
        };

        // Seed the estimator so vision has something to merge against
        drive.sample_odometry();

        drive
    }

    pub fn with_context(mut self, tm: LogContext) -> Self {
        self.tm = tm;
        self
    }

    pub fn params(&self) -> &DriveParams {
        &self.params
    }

    /// Units: meters/second
    pub fn max_speed_mps(&self) -> f64 {
        self.params.max_speed_mps
    }

    /// Units: radians/second
    pub fn max_rotation_radps(&self) -> f64 {
        self.params.max_rotation_radps
    }

    pub fn modules(&self) -> &[SwerveModule; NUM_MODULES] {
        &self.modules
    }

    pub fn gyro(&self) -> &Gyro {
        &self.gyro
    }

    pub fn kinematics(&self) -> &SwerveKinematics {
        &self.kinematics
    }

    fn odometry_source(&self) -> OdometrySource {
        OdometrySource {
            modules: self.modules.clone(),
            gyro: self.gyro.clone(),
        }
    }

    // ---- ODOMETRY AND POSE ----

    /// Start the odometry thread at `rate_hz`.
    pub fn start_odometry(&mut self, rate_hz: f64) {
        if self.odometry.is_some() {
            warn!("Odometry thread already running");
            return;
        }

        self.odometry = Some(OdometryThread::spawn(
            self.odometry_source(),
            self.estimator.clone(),
            self.odom_stats.clone(),
            &self.clock,
            rate_hz,
        ));
    }

    pub fn stop_odometry(&mut self) {
        if let Some(mut t) = self.odometry.take() {
            t.stop();
        }
    }

    pub fn is_odometry_running(&self) -> bool {
        self.odometry.is_some()
    }

    /// Take one odometry sample on this thread.
    pub fn sample_odometry(&self) {
        sample_odometry(
            &self.odometry_source(),
            &self.estimator,
            &self.odom_stats,
            &self.clock,
        );
    }

    pub fn odometry_stats(&self) -> &OdometryStats {
        &self.odom_stats
    }

    /// True if the pose estimator has failed in a way it can't recover from.
    pub fn is_fatal(&self) -> bool {
        self.odom_stats.is_fatal()
    }

    /// The current fused pose.
    pub fn pose(&self) -> Pose2d {
        match self.estimator.lock() {
            Ok(e) => e.pose(),
            Err(_) => self.last_pose,
        }
    }

    /// Restart the estimator from `pose`.
    pub fn reset_pose(&mut self, pose: Pose2d) {
        let (gyro, positions, _) = self.odometry_source().read();
        let now_s = self.clock.now_s();

        match self.estimator.lock() {
            Ok(mut e) => {
                e.reset_pose(pose, now_s, gyro, positions);
                info!("Pose reset to {:?}", pose);
            }
            Err(_) => warn!("Cannot reset pose, estimator mutex poisoned"),
        }
        self.last_pose = pose;
    }

    /// Blend a vision pose measured at `timestamp_s` into the estimate.
    pub fn add_vision_measurement(
        &mut self,
        pose: &Pose2d,
        timestamp_s: f64,
    ) -> Result<Pose2d, EstimatorError> {
        let result = match self.estimator.lock() {
            Ok(mut e) => e.add_vision_measurement(pose, timestamp_s),
            Err(_) => Err(EstimatorError::BufferCorrupt(String::from(
                "estimator mutex poisoned",
            ))),
        };

        if let Err(EstimatorError::BufferCorrupt(_)) = result {
            self.odom_stats.mark_fatal();
        }
        result
    }

    /// Make the robot's current heading the driver's forward.
    pub fn seed_field_centric(&mut self) {
        let perspective = self.operator_perspective;
        match self.estimator.lock() {
            Ok(mut e) => match e.reset_rotation(perspective) {
                Ok(()) => info!(
                    "Field centric seeded, heading now {:.1} deg",
                    perspective.degrees()
                ),
                Err(err) => warn!("Cannot seed field centric: {}", err),
            },
            Err(_) => warn!("Cannot seed field centric, estimator mutex poisoned"),
        }
    }

    pub fn operator_perspective(&self) -> Rotation2d {
        self.operator_perspective
    }

    pub fn set_operator_perspective(&mut self, perspective: Rotation2d) {
        self.operator_perspective = perspective;
        self.perspective_applied = true;
    }

    /// Chassis speeds measured from the modules, robot frame.
    pub fn measured_speeds(&self) -> ChassisSpeeds {
        let mut states = [SwerveModuleState::default(); NUM_MODULES];
        for (s, m) in states.iter_mut().zip(self.modules.iter()) {
            if let Ok(ms) = m.state() {
                *s = ms;
            }
        }
        self.kinematics.to_chassis_speeds(&states)
    }

    // ---- MODULE OFFSETS ----

    /// Steer offsets of each module.
    ///
    /// Units: degrees
    pub fn module_offsets_deg(&self) -> [f64; NUM_MODULES] {
        let mut offsets = [0.0; NUM_MODULES];
        for (o, m) in offsets.iter_mut().zip(self.modules.iter()) {
            *o = m.offset_deg();
        }
        offsets
    }

    /// Apply a steer offset to every module. Takes effect on the next encoder read.
    pub fn set_module_offsets(&mut self, offsets_deg: [f64; NUM_MODULES]) {
        for (m, o) in self.modules.iter_mut().zip(offsets_deg.iter()) {
            m.set_offset_deg(*o);
        }
    }

    /// Compute and apply offsets so each module's current heading reads its target. Returns the
    /// new offsets for the caller to persist.
    ///
    /// Every module is read before any offset is changed, so a disconnected module leaves all
    /// offsets untouched.
    pub fn reset_module_offsets(
        &mut self,
        targets: [Rotation2d; NUM_MODULES],
    ) -> Result<[f64; NUM_MODULES], HalError> {
        for m in self.modules.iter() {
            m.heading()?;
        }

        let mut offsets = [0.0; NUM_MODULES];
        for (i, m) in self.modules.iter_mut().enumerate() {
            offsets[i] = m.reset_offset(targets[i])?;
        }

        info!("Module offsets reset to {:?} deg", offsets);
        Ok(offsets)
    }

    // ---- REQUESTS ----

    /// The latched request.
    pub fn request(&self) -> &SwerveRequest {
        &self.request
    }

    /// Latch and apply a request. Device faults are counted and logged by the device, the
    /// remaining modules are still driven.
    pub fn apply_request(&mut self, request: SwerveRequest) {
        self.request = request;
        let heading = self.pose().heading;

        let faults = match self.request.clone() {
            SwerveRequest::Idle => {
                for m in self.modules.iter_mut() {
                    m.idle();
                }
                0
            }
            SwerveRequest::FieldCentric {
                vx_mps,
                vy_mps,
                omega_radps,
                perspective,
            } => {
                let field = ChassisSpeeds::new(vx_mps, vy_mps, omega_radps);
                let speeds = self.field_to_robot(&field, perspective, heading);
                self.drive_speeds(&speeds, None, false)
            }
            SwerveRequest::RobotCentric {
                vx_mps,
                vy_mps,
                omega_radps,
            } => self.drive_speeds(&ChassisSpeeds::new(vx_mps, vy_mps, omega_radps), None, false),
            SwerveRequest::ApplyRobotSpeeds {
                speeds,
                wheel_force_ff_v,
            } => self.drive_speeds(&speeds, wheel_force_ff_v, true),
            SwerveRequest::ApplyFieldSpeeds {
                speeds,
                perspective,
            } => {
                let speeds = self.field_to_robot(&speeds, perspective, heading);
                self.drive_speeds(&speeds, None, true)
            }
            SwerveRequest::PointWheelsAt(angle) => {
                self.target_angles = [angle; NUM_MODULES];
                self.for_each_module(|m| m.point_at(angle))
            }
            SwerveRequest::Brake => {
                let mut angles = [Rotation2d::default(); NUM_MODULES];
                for (a, loc) in angles.iter_mut().zip(self.kinematics.locations_m().iter()) {
                    *a = Rotation2d::from_xy(loc.x, loc.y);
                }
                self.target_angles = angles;
                let mut faults = 0;
                for (m, a) in self.modules.iter_mut().zip(angles.iter()) {
                    if m.point_at(*a).is_err() {
                        faults += 1;
                    }
                }
                faults
            }
            SwerveRequest::SysIdTranslation { volts } => {
                self.for_each_module(|m| m.apply_voltages(volts, None))
            }
            SwerveRequest::SysIdSteer { volts } => {
                self.for_each_module(|m| m.apply_voltages(0.0, Some(volts)))
            }
            SwerveRequest::SysIdRotation { volts } => {
                self.drive_speeds(&ChassisSpeeds::new(0.0, 0.0, volts), None, true)
            }
        };

        self.num_request_faults += faults;
    }

    /// Track a trajectory sample from the current pose.
    pub fn follow_trajectory(&mut self, sample: &TrajectorySample) {
        let pose = self.pose();
        let speeds = self.follower.calculate(&pose, sample);
        self.apply_request(SwerveRequest::ApplyFieldSpeeds {
            speeds,
            perspective: ForwardPerspective::BlueAlliance,
        });
    }

    pub fn reset_follower(&mut self) {
        self.follower.reset();
    }

    /// Translation and rotation gains of the trajectory follower.
    pub fn follower_gains(&self) -> (PidGains, PidGains) {
        self.follower.gains()
    }

    pub fn set_follower_gains(&mut self, translation: Option<PidGains>, rotation: Option<PidGains>) {
        if let Some(g) = translation {
            self.follower.set_translation_gains(g);
        }
        if let Some(g) = rotation {
            self.follower.set_rotation_gains(g);
        }
    }

    fn field_to_robot(
        &self,
        field: &ChassisSpeeds,
        perspective: ForwardPerspective,
        heading: Rotation2d,
    ) -> ChassisSpeeds {
        let field = match perspective {
            ForwardPerspective::Operator => field.to_field_relative(self.operator_perspective),
            ForwardPerspective::BlueAlliance => *field,
        };
        ChassisSpeeds::from_field_relative(&field, heading)
    }

    /// Drive the modules to achieve robot frame `speeds`, returning the number of modules which
    /// faulted.
    fn drive_speeds(
        &mut self,
        speeds: &ChassisSpeeds,
        wheel_force_ff_v: Option<[f64; NUM_MODULES]>,
        closed_loop: bool,
    ) -> u64 {
        let speeds = speeds.discretize(self.tick_period_s);
        let mut states = self.kinematics.to_module_states(&speeds, &self.target_angles);
        SwerveKinematics::desaturate(&mut states, self.params.module_max_speed_mps);

        let max_speed_mps = self.params.module_max_speed_mps;
        let mut faults = 0;

        for (i, (m, s)) in self.modules.iter_mut().zip(states.iter()).enumerate() {
            self.target_angles[i] = s.angle;

            let output = if closed_loop {
                DriveOutput::Velocity {
                    feedforward_v: wheel_force_ff_v.map(|ff| ff[i]).unwrap_or(0.0),
                }
            } else {
                DriveOutput::OpenLoop { max_speed_mps }
            };

            if m.apply(s, output).is_err() {
                faults += 1;
            }
        }

        faults
    }

    fn for_each_module<F>(&mut self, mut f: F) -> u64
    where
        F: FnMut(&mut SwerveModule) -> Result<(), HalError>,
    {
        let mut faults = 0;
        for m in self.modules.iter_mut() {
            if f(m).is_err() {
                faults += 1;
            }
        }
        faults
    }
}

impl Subsystem for SwerveDrive {
    fn name(&self) -> &str {
        "Drive"
    }

    fn id(&self) -> SubsystemId {
        self.id
    }

    fn periodic(&mut self) {
        // Only follow the alliance while disabled so the perspective can't flip mid-match
        if self.ds.mode() == RobotMode::Disabled || !self.perspective_applied {
            if let Some(alliance) = self.ds.alliance() {
                let p = operator_perspective(alliance);
                if !self.perspective_applied || p != self.operator_perspective {
                    info!("Operator perspective set to {:.0} deg", p.degrees());
                }
                self.set_operator_perspective(p);
            }
        }

        if let Ok(e) = self.estimator.lock() {
            self.last_pose = e.pose();
        }

        self.log(&self.tm);
    }
}

impl Loggable for SwerveDrive {
    fn log(&self, ctx: &LogContext) {
        ctx.put_struct("pose", &self.last_pose);

        let speeds = self.measured_speeds();
        ctx.put(
            "speeds",
            vec![speeds.vx_mps, speeds.vy_mps, speeds.omega_radps],
        );
        ctx.put("speed", speeds.speed_mps());
        ctx.put("request", self.request.kind());
        ctx.put("operator_perspective_deg", self.operator_perspective.degrees());
        ctx.put("odometry_hz", self.odom_stats.frequency_hz());
        ctx.put("failed_odometry_reads", self.odom_stats.failed_reads() as i64);
        ctx.put("request_faults", self.num_request_faults as i64);

        let modules = ctx.child("modules");
        for m in self.modules.iter() {
            modules.log(m.name(), m);
        }
    }
}

impl Drop for SwerveDrive {
    fn drop(&mut self) {
        self.stop_odometry();
    }
}
