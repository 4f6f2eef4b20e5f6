//! # MegaTag camera IO
//!
//! The coprocessor solves the robot pose itself, using the robot yaw published back to it as the
//! reference orientation, and publishes one aggregated estimate per frame.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::vision::{MegaTagEstimate, RobotOrientation, VisionPacket};
use log::warn;
use std::{cell::RefCell, rc::Rc};
use util::geom::{Pose2d, Pose3d, Rotation2d};

use super::{CameraInputs, CameraIo, Observation, VisionHub};
use crate::telemetry::LogContext;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct MegaTagCameraIo {
    name: String,
    robot_to_camera: Pose3d,
    hub: Rc<RefCell<VisionHub>>,
    last_estimate: Option<MegaTagEstimate>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MegaTagCameraIo {
    pub fn new(name: &str, robot_to_camera: Pose3d, hub: Rc<RefCell<VisionHub>>) -> Self {
        Self {
            name: name.to_string(),
            robot_to_camera,
            hub,
            last_estimate: None,
        }
    }
}

impl CameraIo for MegaTagCameraIo {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_inputs(&mut self, inputs: &mut CameraInputs) {
        inputs.clear();

        // Only the newest estimate matters, the coprocessor already fuses over its frames
        let estimate = self
            .hub
            .borrow_mut()
            .take(&self.name)
            .into_iter()
            .filter_map(|p| match p {
                VisionPacket::MegaTag { estimate, .. } => Some(estimate),
                VisionPacket::Pnp { .. } => {
                    warn!("MegaTag camera {} received a PnP packet", self.name);
                    None
                }
            })
            .last();

        let estimate = match estimate {
            Some(e) => e,
            None => return,
        };

        inputs.connected = estimate.tag_count > 0;
        inputs.target_count = estimate.tag_count as usize;
        inputs.latency_s = estimate.latency_ms / 1000.0;

        if inputs.connected {
            inputs.observations.push(Observation {
                pose: Pose2d::new(
                    estimate.pose[0],
                    estimate.pose[1],
                    Rotation2d::from_degrees(estimate.pose[2]),
                ),
                timestamp_s: estimate.timestamp_s,
                tag_ids: estimate.tag_ids.clone(),
            });
        }

        self.last_estimate = Some(estimate);
    }

    fn set_reference_pose(&mut self, pose: &Pose3d) {
        let orientation = RobotOrientation {
            yaw_deg: pose.to_pose2d().heading.degrees(),
            yaw_rate_degps: 0.0,
        };

        if let Err(e) = self
            .hub
            .borrow_mut()
            .publish_orientation(&self.name, orientation)
        {
            warn!("Could not send the reference to {}: {}", self.name, e);
        }
    }

    fn robot_to_camera(&self) -> Pose3d {
        self.robot_to_camera
    }

    fn log(&self, ctx: &LogContext) {
        ctx.put("kind", "megatag");
        if let Some(ref e) = self.last_estimate {
            ctx.put("tag_count", e.tag_count);
            ctx.put("avg_tag_dist_m", e.avg_tag_dist_m);
        }
    }
}
