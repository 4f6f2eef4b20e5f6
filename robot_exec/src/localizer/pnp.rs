//! # PnP camera IO
//!
//! The coprocessor publishes the fiducials seen in each frame and, when two or more are visible,
//! a multi-tag solution of the camera's field pose. The robot pose is taken from the multi-tag
//! solution when there is one. Otherwise every single-tag solution (best and alternate, for each
//! target) is turned into a robot pose and the one closest to the reference pose is used.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::vision::{PnpResult, VisionPacket};
use log::warn;
use std::{cell::RefCell, rc::Rc};
use util::geom::Pose3d;

use super::{CameraInputs, CameraIo, FieldLayout, Observation, VisionHub};
use crate::telemetry::LogContext;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct PnpCameraIo {
    name: String,
    robot_to_camera: Pose3d,
    camera_to_robot: Pose3d,
    layout: Rc<FieldLayout>,
    hub: Rc<RefCell<VisionHub>>,
    reference: Option<Pose3d>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PnpCameraIo {
    pub fn new(
        name: &str,
        robot_to_camera: Pose3d,
        layout: Rc<FieldLayout>,
        hub: Rc<RefCell<VisionHub>>,
    ) -> Self {
        Self {
            name: name.to_string(),
            robot_to_camera,
            camera_to_robot: robot_to_camera.inverse(),
            layout,
            hub,
            reference: None,
        }
    }

    /// Solve the robot's field pose from one frame, returning the pose and the fiducials used.
    pub fn estimate(&self, result: &PnpResult) -> Option<(Pose3d, Vec<i32>)> {
        if let Some(ref mt) = result.multi_tag {
            if mt.field_to_camera.is_finite() && !mt.fiducial_ids.is_empty() {
                let field_to_camera = Pose3d::from(&mt.field_to_camera);
                return Some((
                    field_to_camera.transform_by(&self.camera_to_robot),
                    mt.fiducial_ids.clone(),
                ));
            }
        }

        // (pose, tag id, ambiguity, is the best solution)
        let mut candidates = Vec::new();
        for t in result.targets.iter() {
            let field_to_tag = match self.layout.tag_pose(t.id) {
                Some(p) => p,
                None => continue,
            };

            for (camera_to_tag, is_best) in [(&t.best, true), (&t.alt, false)].iter() {
                if !camera_to_tag.is_finite() {
                    continue;
                }
                let robot = field_to_tag
                    .transform_by(&Pose3d::from(*camera_to_tag).inverse())
                    .transform_by(&self.camera_to_robot);
                candidates.push((robot, t.id, t.ambiguity, *is_best));
            }
        }

        let chosen = match self.reference {
            Some(ref reference) => candidates.iter().min_by(|a, b| {
                a.0.distance_to(reference)
                    .partial_cmp(&b.0.distance_to(reference))
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
            // Without a reference trust the least ambiguous best solution
            None => candidates.iter().filter(|c| c.3).min_by(|a, b| {
                a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal)
            }),
        };

        chosen.map(|c| (c.0, vec![c.1]))
    }
}

impl CameraIo for PnpCameraIo {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_inputs(&mut self, inputs: &mut CameraInputs) {
        inputs.clear();

        let packets = self.hub.borrow_mut().take(&self.name);

        // There's no heartbeat from the coprocessor, so a camera is connected when it has
        // published this tick
        inputs.connected = !packets.is_empty();

        for p in packets {
            let result = match p {
                VisionPacket::Pnp { result, .. } => result,
                VisionPacket::MegaTag { .. } => {
                    warn!("PnP camera {} received a MegaTag packet", self.name);
                    continue;
                }
            };

            inputs.target_count = result.targets.len();
            inputs.latency_s = result.latency_s;

            if let Some((pose, tag_ids)) = self.estimate(&result) {
                inputs.observations.push(Observation {
                    pose: pose.to_pose2d(),
                    timestamp_s: result.timestamp_s,
                    tag_ids,
                });
            }
        }
    }

    fn set_reference_pose(&mut self, pose: &Pose3d) {
        self.reference = Some(*pose);
    }

    fn robot_to_camera(&self) -> Pose3d {
        self.robot_to_camera
    }

    fn log(&self, ctx: &LogContext) {
        ctx.put("kind", "pnp");
        ctx.put("has_reference", self.reference.is_some());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::eqpt::vision::{MultiTagResult, PnpTarget, Transform3};
    use std::f64::consts::FRAC_PI_2;
    use util::geom::{Pose2d, Rotation2d};

    fn layout() -> Rc<FieldLayout> {
        Rc::new(FieldLayout::from_json(include_str!("../../../params/field_layout.json")).unwrap())
    }

    fn camera(hub: &Rc<RefCell<VisionHub>>) -> PnpCameraIo {
        PnpCameraIo::new(
            "FrontLeft",
            Pose3d::from_xyz_rpy(0.3, 0.2, 0.25, 0.0, 0.0, 0.4),
            layout(),
            hub.clone(),
        )
    }

    fn result(targets: Vec<PnpTarget>, multi_tag: Option<MultiTagResult>) -> PnpResult {
        PnpResult {
            timestamp_s: 3.0,
            latency_s: 0.025,
            targets,
            multi_tag,
        }
    }

    /// The camera-to-tag transform a camera on a robot at `robot` sees for tag `id`.
    fn camera_to_tag(io: &PnpCameraIo, robot: &Pose3d, id: i32) -> Transform3 {
        let field_to_camera = robot.transform_by(&io.robot_to_camera());
        field_to_camera
            .inverse()
            .transform_by(&io.layout.tag_pose(id).unwrap())
            .to_transform3()
    }

    fn assert_pose_near(a: &Pose2d, b: &Pose2d) {
        assert!(a.distance_to(b) < 1e-6, "{:?} != {:?}", a, b);
        assert!((a.heading - b.heading).radians().abs() < 1e-6);
    }

    #[test]
    fn test_multi_tag_solution_used() {
        let hub = Rc::new(RefCell::new(VisionHub::offline()));
        let io = camera(&hub);

        let robot = Pose3d::from_xyz_rpy(12.0, 3.5, 0.0, 0.0, 0.0, 0.3);
        let field_to_camera = robot.transform_by(&io.robot_to_camera()).to_transform3();

        let (pose, ids) = io
            .estimate(&result(
                vec![],
                Some(MultiTagResult {
                    field_to_camera,
                    fiducial_ids: vec![6, 7],
                    reproj_error_px: 0.4,
                }),
            ))
            .unwrap();

        assert_pose_near(&pose.to_pose2d(), &robot.to_pose2d());
        assert_eq!(ids, vec![6, 7]);
    }

    #[test]
    fn test_single_tag_closest_to_reference() {
        let hub = Rc::new(RefCell::new(VisionHub::offline()));
        let mut io = camera(&hub);

        let truth = Pose3d::from_xyz_rpy(12.0, 4.0, 0.0, 0.0, 0.0, 0.0);
        let wrong = Pose3d::from_xyz_rpy(11.0, 5.0, 0.0, 0.0, 0.0, FRAC_PI_2);

        // The ambiguous solution is the better one by reprojection, the reference picks the truth
        let target = PnpTarget {
            id: 7,
            best: camera_to_tag(&io, &wrong, 7),
            alt: camera_to_tag(&io, &truth, 7),
            ambiguity: 0.4,
        };

        let (no_ref, _) = io.estimate(&result(vec![target.clone()], None)).unwrap();
        assert_pose_near(&no_ref.to_pose2d(), &wrong.to_pose2d());

        io.set_reference_pose(&Pose3d::from_pose2d(&Pose2d::new(
            11.9,
            4.1,
            Rotation2d::default(),
        )));
        let (pose, ids) = io.estimate(&result(vec![target], None)).unwrap();
        assert_pose_near(&pose.to_pose2d(), &truth.to_pose2d());
        assert_eq!(ids, vec![7]);
    }

    #[test]
    fn test_unknown_tags_give_nothing() {
        let hub = Rc::new(RefCell::new(VisionHub::offline()));
        let mut io = camera(&hub);

        let target = PnpTarget {
            id: 99,
            best: Transform3::identity(),
            alt: Transform3::identity(),
            ambiguity: 0.1,
        };
        hub.borrow_mut().push(VisionPacket::Pnp {
            camera: "FrontLeft".into(),
            result: result(vec![target], None),
        });

        let mut inputs = CameraInputs::default();
        io.update_inputs(&mut inputs);
        assert!(inputs.connected);
        assert_eq!(inputs.target_count, 1);
        assert!((inputs.latency_s - 0.025).abs() < 1e-12);
        assert!(inputs.observations.is_empty());

        // Nothing published this tick
        io.update_inputs(&mut inputs);
        assert!(!inputs.connected);
        assert_eq!(inputs.target_count, 0);
    }
}
