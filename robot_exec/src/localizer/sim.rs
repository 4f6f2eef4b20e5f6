//! Simulated camera IO, observing the fiducials within range of a ground truth pose.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;
use std::rc::Rc;
use util::{
    geom::{Pose2d, Pose3d},
    time::Clock,
};

use super::{CameraInputs, CameraIo, FieldLayout, Observation};
use crate::telemetry::LogContext;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Simulated camera parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct SimCameraParams {
    /// Fiducials further than this from the camera are not seen.
    ///
    /// Units: meters
    pub max_range_m: f64,

    /// Half of the horizontal field of view.
    ///
    /// Units: degrees
    pub half_fov_deg: f64,

    /// Units: seconds
    pub latency_s: f64,

    /// Time between frames.
    ///
    /// Units: seconds
    pub frame_period_s: f64,
}

pub struct SimCameraIo {
    name: String,
    robot_to_camera: Pose3d,
    layout: Rc<FieldLayout>,
    params: SimCameraParams,
    clock: Clock,
    truth: Box<dyn Fn() -> Pose2d>,
    last_frame_s: Option<f64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimCameraIo {
    /// Create a camera which sees the field from the pose returned by `truth`.
    pub fn new<F: Fn() -> Pose2d + 'static>(
        name: &str,
        robot_to_camera: Pose3d,
        layout: Rc<FieldLayout>,
        params: SimCameraParams,
        clock: &Clock,
        truth: F,
    ) -> Self {
        Self {
            name: name.to_string(),
            robot_to_camera,
            layout,
            params,
            clock: clock.clone(),
            truth: Box::new(truth),
            last_frame_s: None,
        }
    }

    /// Ids of the fiducials visible from `robot`.
    pub fn visible_tags(&self, robot: &Pose2d) -> Vec<i32> {
        let camera = Pose3d::from_pose2d(robot).transform_by(&self.robot_to_camera);
        let camera_inv = camera.inverse();

        self.layout
            .tags()
            .into_iter()
            .filter(|(_, tag)| {
                // Tag in the camera frame, +x out of the lens
                let t = camera_inv.transform_by(tag).translation();
                let range = t.norm();
                let bearing_deg = t.y.atan2(t.x).to_degrees();
                t.x > 0.0 && range <= self.params.max_range_m
                    && bearing_deg.abs() <= self.params.half_fov_deg
            })
            .map(|(id, _)| id)
            .collect()
    }
}

impl CameraIo for SimCameraIo {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_inputs(&mut self, inputs: &mut CameraInputs) {
        inputs.clear();

        let now_s = self.clock.now_s();
        if let Some(last) = self.last_frame_s {
            if now_s - last < self.params.frame_period_s {
                return;
            }
        }
        self.last_frame_s = Some(now_s);

        let truth = (self.truth)();
        let tag_ids = self.visible_tags(&truth);

        inputs.connected = true;
        inputs.target_count = tag_ids.len();
        inputs.latency_s = self.params.latency_s;

        if !tag_ids.is_empty() {
            inputs.observations.push(Observation {
                pose: truth,
                timestamp_s: now_s - self.params.latency_s,
                tag_ids,
            });
        }
    }

    fn set_reference_pose(&mut self, _pose: &Pose3d) {}

    fn robot_to_camera(&self) -> Pose3d {
        self.robot_to_camera
    }

    fn log(&self, ctx: &LogContext) {
        ctx.put("kind", "sim");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use util::geom::Rotation2d;

    fn params() -> SimCameraParams {
        SimCameraParams {
            max_range_m: 4.0,
            half_fov_deg: 35.0,
            latency_s: 0.03,
            frame_period_s: 0.04,
        }
    }

    #[test]
    fn test_sees_tags_in_front() {
        let layout =
            Rc::new(FieldLayout::from_json(include_str!("../../../params/field_layout.json")).unwrap());
        let clock = Clock::manual();
        clock.set(2.0);

        // Facing tag 18 on the blue reef from 2 m away
        let truth = Pose2d::new(1.66, 4.0259, Rotation2d::from_degrees(0.0));
        let mut io = SimCameraIo::new(
            "Sim",
            Pose3d::identity(),
            layout,
            params(),
            &clock,
            move || truth,
        );

        let mut inputs = CameraInputs::default();
        io.update_inputs(&mut inputs);
        assert!(inputs.connected);
        assert_eq!(inputs.observations.len(), 1);
        assert!(inputs.observations[0].tag_ids.contains(&18));
        assert!((inputs.observations[0].timestamp_s - 1.97).abs() < 1e-9);

        // Next frame isn't due yet
        clock.advance(0.02);
        io.update_inputs(&mut inputs);
        assert!(inputs.observations.is_empty());

        // Facing away from everything
        let mut away = SimCameraIo::new(
            "Sim",
            Pose3d::identity(),
            Rc::new(FieldLayout::from_json(include_str!("../../../params/field_layout.json")).unwrap()),
            params(),
            &clock,
            move || Pose2d::new(1.66, 4.0259, Rotation2d::from_degrees(180.0)),
        );
        away.update_inputs(&mut inputs);
        assert!(inputs.connected);
        assert!(inputs.observations.is_empty());
    }
}
