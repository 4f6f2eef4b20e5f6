//! # Vision coprocessor packets
//!
//! Two kinds of coprocessor are supported. PnP coprocessors publish the raw fiducial targets seen
//! in each frame (plus a multi-tag solution when one is available), and the robot solves for its
//! own pose. MegaTag coprocessors publish an aggregated robot pose estimate and need the robot's
//! yaw sent back to them as a reference.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A rigid transform as published by a coprocessor.
///
/// Translation units: meters. Rotation is a unit quaternion.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform3 {
    pub x_m: f64,
    pub y_m: f64,
    pub z_m: f64,
    pub qw: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
}

/// A single fiducial target seen by a PnP camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnpTarget {
    /// Fiducial id
    pub id: i32,

    /// Best camera-to-target transform
    pub best: Transform3,

    /// Alternate camera-to-target transform (the other solution of the ambiguous PnP problem)
    pub alt: Transform3,

    /// Ratio of best to alternate reprojection error, in [0, 1]
    pub ambiguity: f64,
}

/// A multi-tag solution of the field-to-camera transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiTagResult {
    pub field_to_camera: Transform3,

    /// Ids of the fiducials used in the solve
    pub fiducial_ids: Vec<i32>,

    /// Reprojection error of the solve.
    ///
    /// Units: pixels
    pub reproj_error_px: f64,
}

/// The result of processing one frame on a PnP coprocessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnpResult {
    /// Capture timestamp on the robot's clock (the coprocessor corrects for clock offset before
    /// publishing).
    ///
    /// Units: seconds
    pub timestamp_s: f64,

    /// Capture-to-publish latency.
    ///
    /// Units: seconds
    pub latency_s: f64,

    pub targets: Vec<PnpTarget>,

    #[serde(default)]
    pub multi_tag: Option<MultiTagResult>,
}

/// An aggregated robot pose estimate from a MegaTag coprocessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MegaTagEstimate {
    /// Robot pose on the field as `[x_m, y_m, yaw_deg]`
    pub pose: [f64; 3],

    /// Capture timestamp on the robot's clock.
    ///
    /// Units: seconds
    pub timestamp_s: f64,

    /// Pipeline plus capture latency.
    ///
    /// Units: milliseconds
    pub latency_ms: f64,

    pub tag_count: u32,

    /// Average distance to the tags used.
    ///
    /// Units: meters
    pub avg_tag_dist_m: f64,

    #[serde(default)]
    pub tag_ids: Vec<i32>,
}

/// Reference orientation sent to a MegaTag coprocessor.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotOrientation {
    /// Units: degrees
    pub yaw_deg: f64,

    /// Units: degrees/second
    pub yaw_rate_degps: f64,
}

/// Reference orientation addressed to one camera, published by the robot every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionRefPacket {
    pub camera: String,
    pub orientation: RobotOrientation,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Packet published by a vision coprocessor, tagged with the camera name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VisionPacket {
    Pnp { camera: String, result: PnpResult },
    MegaTag { camera: String, estimate: MegaTagEstimate },
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl VisionPacket {
    /// Name of the camera which produced this packet.
    pub fn camera(&self) -> &str {
        match self {
            VisionPacket::Pnp { camera, .. } => camera,
            VisionPacket::MegaTag { camera, .. } => camera,
        }
    }
}

impl Transform3 {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            x_m: 0.0,
            y_m: 0.0,
            z_m: 0.0,
            qw: 1.0,
            qx: 0.0,
            qy: 0.0,
            qz: 0.0,
        }
    }

    /// True if every component is finite.
    pub fn is_finite(&self) -> bool {
        [self.x_m, self.y_m, self.z_m, self.qw, self.qx, self.qy, self.qz]
            .iter()
            .all(|v| v.is_finite())
    }
}
