//! # Swerve module
//!
//! One steer and drive pair with its absolute steering encoder.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::info;
use serde::Serialize;
use util::{geom::Rotation2d, maths::wrap_deg_180};

use super::{ModuleParams, SwerveModulePosition, SwerveModuleState};
use crate::{
    hal::{AbsoluteEncoder, ControlRequest, HalError, Hardware, Motor, MotorConfig},
    telemetry::{LogContext, Loggable},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A swerve module.
///
/// Device handles are shared, so a clone of a module reads the same hardware. The odometry
/// thread holds one.
#[derive(Clone)]
pub struct SwerveModule {
    name: String,
    drive: Motor,
    steer: Motor,
    encoder: AbsoluteEncoder,

    /// Units: meters
    wheel_circumference_m: f64,

    status: ModuleStatus,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Calibration state of a module.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum ModuleStatus {
    /// No steer offset has been applied
    Uncalibrated,

    /// An offset has been applied, nothing has been driven since
    Calibrated,

    Driving,
}

/// How the drive motor of a module is commanded.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum DriveOutput {
    /// Closed loop wheel velocity, with an optional wheel force feedforward in volts
    Velocity { feedforward_v: f64 },

    /// Open loop, speed as a fraction of `max_speed_mps`
    OpenLoop { max_speed_mps: f64 },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SwerveModule {
    pub fn new(
        hw: &Hardware,
        params: &ModuleParams,
        drive_config: &MotorConfig,
        steer_config: &MotorConfig,
        wheel_circumference_m: f64,
    ) -> Self {
        let drive = hw.motor(&format!("{}/drive", params.name), drive_config.clone());
        let steer = hw.motor(&format!("{}/steer", params.name), steer_config.clone());
        let encoder = hw.absolute_encoder(
            &format!("{}/encoder", params.name),
            Some(&steer),
            params.sim_mount_deg,
        );

        Self {
            name: params.name.clone(),
            drive,
            steer,
            encoder,
            wheel_circumference_m,
            status: ModuleStatus::Uncalibrated,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ModuleStatus {
        self.status
    }

    pub fn encoder(&self) -> &AbsoluteEncoder {
        &self.encoder
    }

    pub fn drive_motor(&self) -> &Motor {
        &self.drive
    }

    /// Offset-corrected wheel heading.
    pub fn heading(&self) -> Result<Rotation2d, HalError> {
        Ok(Rotation2d::from_degrees(self.encoder.absolute_deg()?))
    }

    /// Raw encoder heading, before the offset.
    ///
    /// Units: degrees
    pub fn raw_heading_deg(&self) -> Result<f64, HalError> {
        self.encoder.raw_deg()
    }

    pub fn offset_deg(&self) -> f64 {
        self.encoder.offset_deg()
    }

    /// Apply a steer offset, takes effect on the next encoder read.
    pub fn set_offset_deg(&mut self, offset_deg: f64) {
        self.encoder.set_offset_deg(offset_deg);
        if self.status != ModuleStatus::Calibrated {
            info!(
                "Module {} calibrated with offset {:.2} deg",
                self.name,
                self.encoder.offset_deg()
            );
        }
        self.status = ModuleStatus::Calibrated;
    }

    /// Compute and apply the offset which makes the current heading read `target`, returning it
    /// wrapped into [-180, 180).
    pub fn reset_offset(&mut self, target: Rotation2d) -> Result<f64, HalError> {
        let current_deg = self.encoder.absolute_deg()?;
        let offset_deg = wrap_deg_180(self.encoder.offset_deg() + target.degrees() - current_deg);
        self.set_offset_deg(offset_deg);
        Ok(offset_deg)
    }

    /// Wheel distance and heading.
    pub fn position(&self) -> Result<SwerveModulePosition, HalError> {
        Ok(SwerveModulePosition::new(
            self.drive.position_rot()? * self.wheel_circumference_m,
            self.heading()?,
        ))
    }

    /// Wheel speed and heading.
    pub fn state(&self) -> Result<SwerveModuleState, HalError> {
        Ok(SwerveModuleState::new(
            self.drive.velocity_rps()? * self.wheel_circumference_m,
            self.heading()?,
        ))
    }

    /// Drive to `target`, optimising the steering.
    pub fn apply(&mut self, target: &SwerveModuleState, output: DriveOutput) -> Result<(), HalError> {
        let current = self.heading()?;
        let state = target.optimize(current);

        self.steer_to(state.angle, current)?;

        let request = match output {
            DriveOutput::Velocity { feedforward_v } => ControlRequest::Velocity {
                velocity_rps: state.speed_mps / self.wheel_circumference_m,
                feedforward_v,
            },
            DriveOutput::OpenLoop { max_speed_mps } => ControlRequest::DutyCycle {
                output: if max_speed_mps > 0.0 {
                    (state.speed_mps / max_speed_mps).max(-1.0).min(1.0)
                } else {
                    0.0
                },
            },
        };
        self.drive.set_control(request)?;

        self.mark_driving();
        Ok(())
    }

    /// Point the wheel at `angle` without driving.
    pub fn point_at(&mut self, angle: Rotation2d) -> Result<(), HalError> {
        let current = self.heading()?;
        let target = SwerveModuleState::new(0.0, angle).optimize(current);
        self.steer_to(target.angle, current)?;
        self.drive.set_control(ControlRequest::Neutral)?;
        self.mark_driving();
        Ok(())
    }

    /// Raw voltages for characterisation. `steer_v` of `None` holds the wheel straight.
    pub fn apply_voltages(&mut self, drive_v: f64, steer_v: Option<f64>) -> Result<(), HalError> {
        match steer_v {
            Some(v) => self.steer.set_control(ControlRequest::Voltage { volts: v })?,
            None => {
                let current = self.heading()?;
                self.steer_to(Rotation2d::default(), current)?;
            }
        }
        self.drive.set_control(ControlRequest::Voltage { volts: drive_v })?;
        self.mark_driving();
        Ok(())
    }

    /// Put both motors in neutral.
    pub fn idle(&mut self) {
        self.drive.stop();
        self.steer.stop();
    }

    /// Steer position requests are relative to the steer motor's own position, so the request
    /// stays correct whatever the encoder offset.
    fn steer_to(&self, angle: Rotation2d, current: Rotation2d) -> Result<(), HalError> {
        let error_rot = (angle - current).degrees() / 360.0;
        let steer_rot = self.steer.position_rot()?;
        self.steer.set_control(ControlRequest::Position {
            position_rot: steer_rot + error_rot,
            velocity_rps: 0.0,
            feedforward_v: 0.0,
        })
    }

    fn mark_driving(&mut self) {
        if self.status == ModuleStatus::Calibrated {
            self.status = ModuleStatus::Driving;
        }
    }
}

impl Loggable for SwerveModule {
    fn log(&self, ctx: &LogContext) {
        if let Ok(s) = self.state() {
            ctx.put("speed_mps", s.speed_mps);
            ctx.put("angle_deg", s.angle.degrees());
        }
        ctx.put("offset_deg", self.offset_deg());
        ctx.put("status", format!("{:?}", self.status));
        ctx.put("connected", self.drive.is_connected() && self.steer.is_connected());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use util::time::Clock;

    fn module(clock: &Clock) -> SwerveModule {
        let hw = Hardware::sim(clock);
        let params = ModuleParams {
            name: "FrontLeft".into(),
            location_m: [0.3, 0.3],
            offset_pref_key: "FrontLeftOffset".into(),
            sim_mount_deg: 30.0,
        };
        let config = MotorConfig {
            sim_free_speed_rps: 10.0,
            ..Default::default()
        };
        SwerveModule::new(&hw, &params, &config, &config, 0.5)
    }

    #[test]
    fn test_calibration_states() {
        let clock = Clock::manual();
        let mut m = module(&clock);
        assert_eq!(m.status(), ModuleStatus::Uncalibrated);

        let offset = m.reset_offset(Rotation2d::default()).unwrap();
        assert!((offset + 30.0).abs() < 1e-9);
        assert!(m.heading().unwrap().degrees().abs() < 1e-9);
        assert_eq!(m.status(), ModuleStatus::Calibrated);

        m.apply(
            &SwerveModuleState::new(1.0, Rotation2d::default()),
            DriveOutput::Velocity { feedforward_v: 0.0 },
        )
        .unwrap();
        assert_eq!(m.status(), ModuleStatus::Driving);
    }

    #[test]
    fn test_steers_and_drives() {
        let clock = Clock::manual();
        let mut m = module(&clock);
        m.set_offset_deg(-30.0);

        m.apply(
            &SwerveModuleState::new(2.5, Rotation2d::from_degrees(45.0)),
            DriveOutput::Velocity { feedforward_v: 0.0 },
        )
        .unwrap();
        clock.advance(1.0);

        let s = m.state().unwrap();
        assert!((s.angle.degrees() - 45.0).abs() < 1e-6);
        assert!((s.speed_mps - 2.5).abs() < 1e-9);
        assert!((m.position().unwrap().distance_m - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_disconnected_module_reports_error() {
        let clock = Clock::manual();
        let mut m = module(&clock);
        m.encoder().set_sim_connected(false);
        assert!(m.position().is_err());
        assert!(m
            .apply(
                &SwerveModuleState::default(),
                DriveOutput::OpenLoop { max_speed_mps: 4.5 }
            )
            .is_err());
    }
}
