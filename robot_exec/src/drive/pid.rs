//! # PID controllers
//!
//! The software PID controller used by the holonomic trajectory follower, and the follower itself.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use util::{
    geom::{Pose2d, Rotation2d},
    maths::input_modulus,
};

use super::{trajectory::TrajectorySample, ChassisSpeeds};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// PID gains.
#[derive(Debug, Copy, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PidGains {
    pub kp: f64,
    #[serde(default)]
    pub ki: f64,
    #[serde(default)]
    pub kd: f64,
}

/// A PID controller.
///
/// Runs at a fixed period, the period of the loop calling it.
#[derive(Debug, Clone, Serialize)]
pub struct PidController {
    gains: PidGains,

    /// Units: seconds
    period_s: f64,

    /// Wrap the error into this range, for angles
    continuous: Option<(f64, f64)>,

    /// Previous error
    prev_error: Option<f64>,

    /// The integral accumulation
    integral: f64,
}

/// Three axis controller tracking trajectory samples with a holonomic chassis.
#[derive(Debug, Clone)]
pub struct HolonomicFollower {
    x_ctrl: PidController,
    y_ctrl: PidController,
    heading_ctrl: PidController,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PidController {
    /// Create a new controller with the given gains.
    pub fn new(gains: PidGains, period_s: f64) -> Self {
        Self {
            gains,
            period_s,
            continuous: None,
            prev_error: None,
            integral: 0.0,
        }
    }

    /// Treat `min` and `max` as the same point, the error is always taken the short way round.
    pub fn with_continuous_input(mut self, min: f64, max: f64) -> Self {
        self.continuous = Some((min, max));
        self
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn set_gains(&mut self, gains: PidGains) {
        self.gains = gains;
    }

    /// Clear the integral and derivative history.
    pub fn reset(&mut self) {
        self.prev_error = None;
        self.integral = 0.0;
    }

    /// Controller output for the given measurement and setpoint.
    pub fn calculate(&mut self, measurement: f64, setpoint: f64) -> f64 {
        let error = match self.continuous {
            Some((min, max)) => {
                let half = (max - min) / 2.0;
                input_modulus(setpoint - measurement, -half, half)
            }
            None => setpoint - measurement,
        };

        let dt = self.period_s;

        // No derivative on the first call, there's no previous error to difference against
        let deriv = match self.prev_error {
            Some(e) if dt > 0.0 => (error - e) / dt,
            _ => 0.0,
        };

        self.integral += error * dt;
        self.prev_error = Some(error);

        self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * deriv
    }
}

impl HolonomicFollower {
    pub fn new(translation: PidGains, rotation: PidGains, period_s: f64) -> Self {
        Self {
            x_ctrl: PidController::new(translation, period_s),
            y_ctrl: PidController::new(translation, period_s),
            heading_ctrl: PidController::new(rotation, period_s)
                .with_continuous_input(-std::f64::consts::PI, std::f64::consts::PI),
        }
    }

    pub fn set_translation_gains(&mut self, gains: PidGains) {
        self.x_ctrl.set_gains(gains);
        self.y_ctrl.set_gains(gains);
    }

    pub fn set_rotation_gains(&mut self, gains: PidGains) {
        self.heading_ctrl.set_gains(gains);
    }

    /// Translation and rotation gains.
    pub fn gains(&self) -> (PidGains, PidGains) {
        (self.x_ctrl.gains(), self.heading_ctrl.gains())
    }

    pub fn reset(&mut self) {
        self.x_ctrl.reset();
        self.y_ctrl.reset();
        self.heading_ctrl.reset();
    }

    /// Field frame speeds which track `sample` from `pose`: the sample's feedforward velocities
    /// plus a PID correction on each axis.
    pub fn calculate(&mut self, pose: &Pose2d, sample: &TrajectorySample) -> ChassisSpeeds {
        let heading: Rotation2d = pose.heading;

        ChassisSpeeds::new(
            sample.vx_mps + self.x_ctrl.calculate(pose.x_m, sample.x_m),
            sample.vy_mps + self.y_ctrl.calculate(pose.y_m, sample.y_m),
            sample.omega_radps
                + self
                    .heading_ctrl
                    .calculate(heading.radians(), sample.heading_rad),
        )
    }
}
