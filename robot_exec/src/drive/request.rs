//! # Drive requests
//!
//! What the drivetrain is asked to do. A request is latched until the next one is applied.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use util::geom::Rotation2d;

use super::{ChassisSpeeds, NUM_MODULES};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Which way is "forward" for a field frame request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ForwardPerspective {
    /// Forward is the driver's forward, rotated by the operator perspective
    Operator,

    /// Forward is `+x` of the blue-origin field frame
    BlueAlliance,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SwerveRequest {
    /// No output, motors coast or brake per their config
    Idle,

    /// Field frame velocities, as driven from a joystick
    FieldCentric {
        vx_mps: f64,
        vy_mps: f64,
        omega_radps: f64,
        perspective: ForwardPerspective,
    },

    /// Robot frame velocities
    RobotCentric {
        vx_mps: f64,
        vy_mps: f64,
        omega_radps: f64,
    },

    /// Robot frame chassis speeds with optional per-module wheel force feedforwards
    ApplyRobotSpeeds {
        speeds: ChassisSpeeds,
        wheel_force_ff_v: Option<[f64; NUM_MODULES]>,
    },

    /// Field frame chassis speeds
    ApplyFieldSpeeds {
        speeds: ChassisSpeeds,
        perspective: ForwardPerspective,
    },

    /// Point every wheel at an angle without driving
    PointWheelsAt(Rotation2d),

    /// Point the wheels in an X to resist being pushed
    Brake,

    /// Drive voltage on every module with the wheels held straight
    SysIdTranslation { volts: f64 },

    /// Steer voltage on every module
    SysIdSteer { volts: f64 },

    /// Rotate in place, one volt per radian per second
    SysIdRotation { volts: f64 },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SwerveRequest {
    /// A field centric request from the driver's point of view.
    pub fn field_centric(vx_mps: f64, vy_mps: f64, omega_radps: f64) -> Self {
        SwerveRequest::FieldCentric {
            vx_mps,
            vy_mps,
            omega_radps,
            perspective: ForwardPerspective::Operator,
        }
    }

    /// Short name for telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            SwerveRequest::Idle => "Idle",
            SwerveRequest::FieldCentric { .. } => "FieldCentric",
            SwerveRequest::RobotCentric { .. } => "RobotCentric",
            SwerveRequest::ApplyRobotSpeeds { .. } => "ApplyRobotSpeeds",
            SwerveRequest::ApplyFieldSpeeds { .. } => "ApplyFieldSpeeds",
            SwerveRequest::PointWheelsAt(_) => "PointWheelsAt",
            SwerveRequest::Brake => "Brake",
            SwerveRequest::SysIdTranslation { .. } => "SysIdTranslation",
            SwerveRequest::SysIdSteer { .. } => "SysIdSteer",
            SwerveRequest::SysIdRotation { .. } => "SysIdRotation",
        }
    }
}

impl Default for SwerveRequest {
    fn default() -> Self {
        SwerveRequest::Idle
    }
}
