//! # Localizer
//!
//! Presents any number of fiducial cameras as a single source of timestamped robot pose
//! estimates. Each main tick the localizer polls every camera, validates what they report and
//! keeps this tick's estimates for the container to forward to the drive.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod field_layout;
mod megatag;
mod pnp;
mod sim;
mod source;

pub use field_layout::FieldLayout;
pub use megatag::MegaTagCameraIo;
pub use pnp::PnpCameraIo;
pub use sim::{SimCameraIo, SimCameraParams};
pub use source::{VisionError, VisionHub};

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use serde::Deserialize;
use std::{cell::RefCell, rc::Rc};
use util::{
    geom::{Pose2d, Pose3d},
    time::{Clock, Timer},
};

use crate::{
    cmd::{Subsystem, SubsystemId},
    telemetry::{LogContext, Loggable},
};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A fiducial camera.
pub trait CameraIo {
    fn name(&self) -> &str;

    /// Refresh `inputs` with everything the camera has produced since the last call.
    fn update_inputs(&mut self, inputs: &mut CameraInputs);

    /// Give the camera's solver a prior for the robot pose.
    fn set_reference_pose(&mut self, pose: &Pose3d);

    /// Pose of the camera in the robot frame.
    fn robot_to_camera(&self) -> Pose3d;

    fn log(&self, _ctx: &LogContext) {}
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Localizer parameters, from `vision.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct VisionParams {
    /// How long after the last estimate [`Localizer::has_had_recent_estimate`] stays true.
    ///
    /// Units: seconds
    pub estimate_timeout_s: f64,

    /// File name of the field layout in the params directory
    pub field_layout: String,

    pub cameras: Vec<CameraParams>,

    /// Used in place of the real cameras when simulating
    pub sim: SimCameraParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraParams {
    pub name: String,

    pub kind: CameraKind,

    pub robot_to_camera: CameraMount,
}

/// Camera pose on the robot.
///
/// Units: meters, radians
#[derive(Debug, Copy, Clone, Deserialize)]
pub struct CameraMount {
    pub x_m: f64,
    pub y_m: f64,
    pub z_m: f64,
    pub roll_rad: f64,
    pub pitch_rad: f64,
    pub yaw_rad: f64,
}

/// One robot pose solved by a camera.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub pose: Pose2d,

    /// Capture time on the robot's clock.
    ///
    /// Units: seconds
    pub timestamp_s: f64,

    /// Fiducials used in the solve
    pub tag_ids: Vec<i32>,
}

/// What a camera reported in one tick.
#[derive(Debug, Clone, Default)]
pub struct CameraInputs {
    pub connected: bool,
    pub observations: Vec<Observation>,
    pub target_count: usize,

    /// Units: seconds
    pub latency_s: f64,
}

/// A validated robot pose estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatedPose {
    pub pose: Pose2d,

    /// Units: seconds
    pub timestamp_s: f64,

    pub camera: String,

    pub tag_ids: Vec<i32>,
}

struct Camera {
    io: Box<dyn CameraIo>,
    inputs: CameraInputs,

    /// Ticks this camera has been dropped for reporting non-finite values
    num_rejected: u64,
}

/// The localizer subsystem.
pub struct Localizer {
    id: SubsystemId,
    hub: Rc<RefCell<VisionHub>>,
    cameras: Vec<Camera>,
    estimates: Vec<EstimatedPose>,
    since_last_estimate: Timer,
    estimate_timeout_s: f64,
    tm: LogContext,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
pub enum CameraKind {
    Pnp,
    MegaTag,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CameraMount {
    pub fn to_pose3d(&self) -> Pose3d {
        Pose3d::from_xyz_rpy(
            self.x_m,
            self.y_m,
            self.z_m,
            self.roll_rad,
            self.pitch_rad,
            self.yaw_rad,
        )
    }
}

impl CameraInputs {
    pub fn clear(&mut self) {
        self.connected = false;
        self.observations.clear();
        self.target_count = 0;
        self.latency_s = 0.0;
    }
}

impl Localizer {
    /// Create a localizer with no cameras. The hub is polled at the start of every periodic.
    pub fn new(hub: Rc<RefCell<VisionHub>>, clock: &Clock, estimate_timeout_s: f64) -> Self {
        Self {
            id: SubsystemId::next(),
            hub,
            cameras: Vec::new(),
            estimates: Vec::new(),
            // Running from creation, so the localizer reports recent for the first timeout
            since_last_estimate: Timer::started(clock),
            estimate_timeout_s,
            tm: LogContext::new("Localizer"),
        }
    }

    /// Build the real cameras listed in `params`.
    pub fn from_params(
        params: &VisionParams,
        hub: Rc<RefCell<VisionHub>>,
        layout: Rc<FieldLayout>,
        clock: &Clock,
    ) -> Self {
        let mut localizer = Self::new(hub.clone(), clock, params.estimate_timeout_s);

        for c in params.cameras.iter() {
            let mount = c.robot_to_camera.to_pose3d();
            let io: Box<dyn CameraIo> = match c.kind {
                CameraKind::Pnp => Box::new(PnpCameraIo::new(
                    &c.name,
                    mount,
                    layout.clone(),
                    hub.clone(),
                )),
                CameraKind::MegaTag => Box::new(MegaTagCameraIo::new(&c.name, mount, hub.clone())),
            };
            localizer.add_camera(io);
        }

        localizer
    }

    pub fn with_context(mut self, tm: LogContext) -> Self {
        self.tm = tm;
        self
    }

    pub fn add_camera(&mut self, io: Box<dyn CameraIo>) {
        info!("Localizer camera {} added", io.name());
        self.cameras.push(Camera {
            io,
            inputs: CameraInputs::default(),
            num_rejected: 0,
        });
    }

    pub fn num_cameras(&self) -> usize {
        self.cameras.len()
    }

    /// Pass the current pose estimate to every camera as a prior for its next solve.
    pub fn update_with_reference_pose(&mut self, pose: &Pose2d) {
        let pose3d = Pose3d::from_pose2d(pose);
        for c in self.cameras.iter_mut() {
            c.io.set_reference_pose(&pose3d);
        }
    }

    /// True if any camera has produced an estimate within the timeout.
    pub fn has_had_recent_estimate(&self) -> bool {
        !self.since_last_estimate.has_elapsed(self.estimate_timeout_s)
    }

    /// Units: seconds
    pub fn time_since_last_estimate_s(&self) -> f64 {
        self.since_last_estimate.get_s()
    }

    /// The estimates produced this tick, in camera order.
    pub fn estimated_poses(&self) -> &[EstimatedPose] {
        &self.estimates
    }

    /// Poll the hub and every camera, replacing this tick's estimates.
    pub fn update(&mut self) {
        self.estimates.clear();

        if let Err(e) = self.hub.borrow_mut().poll() {
            warn!("Could not poll the vision hub: {}", e);
        }

        for c in self.cameras.iter_mut() {
            c.io.update_inputs(&mut c.inputs);

            let all_finite = c
                .inputs
                .observations
                .iter()
                .all(|o| o.pose.is_finite() && o.timestamp_s.is_finite());

            if !all_finite {
                if c.num_rejected == 0 {
                    warn!("Camera {} reported a non-finite pose", c.io.name());
                }
                c.num_rejected += 1;
                c.inputs.clear();
                continue;
            }

            for o in c.inputs.observations.iter() {
                if o.tag_ids.is_empty() {
                    debug!("Dropping estimate from {} with no tags", c.io.name());
                    continue;
                }

                self.estimates.push(EstimatedPose {
                    pose: o.pose,
                    timestamp_s: o.timestamp_s,
                    camera: c.io.name().to_string(),
                    tag_ids: o.tag_ids.clone(),
                });
            }
        }

        if !self.estimates.is_empty() {
            self.since_last_estimate.restart();
        }
    }
}

impl Subsystem for Localizer {
    fn name(&self) -> &str {
        "Localizer"
    }

    fn id(&self) -> SubsystemId {
        self.id
    }

    fn periodic(&mut self) {
        self.update();
        self.log(&self.tm);
    }
}

impl Loggable for Localizer {
    fn log(&self, ctx: &LogContext) {
        ctx.put("has_recent_estimate", self.has_had_recent_estimate());
        ctx.put("time_since_estimate_s", self.time_since_last_estimate_s());
        ctx.put("num_estimates", self.estimates.len());

        for c in self.cameras.iter() {
            let cc = ctx.child(c.io.name());
            cc.put("connected", c.inputs.connected);
            cc.put("target_count", c.inputs.target_count);
            cc.put("latency_s", c.inputs.latency_s);
            cc.put("pose_count", c.inputs.observations.len());
            cc.put("rejected", c.num_rejected as i64);
            if let Some(o) = c.inputs.observations.last() {
                cc.put_struct("latest_pose", &o.pose);
            }
            c.io.log(&cc.child("io"));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use util::geom::Rotation2d;

    /// A camera replaying scripted inputs, one per update.
    struct ScriptedCamera {
        name: String,
        script: Vec<CameraInputs>,
        reference: Rc<RefCell<Option<Pose3d>>>,
    }

    impl CameraIo for ScriptedCamera {
        fn name(&self) -> &str {
            &self.name
        }

        fn update_inputs(&mut self, inputs: &mut CameraInputs) {
            inputs.clear();
            if !self.script.is_empty() {
                *inputs = self.script.remove(0);
            }
        }

        fn set_reference_pose(&mut self, pose: &Pose3d) {
            *self.reference.borrow_mut() = Some(*pose);
        }

        fn robot_to_camera(&self) -> Pose3d {
            Pose3d::identity()
        }
    }

    fn seen(x_m: f64, timestamp_s: f64, tags: Vec<i32>) -> CameraInputs {
        CameraInputs {
            connected: true,
            observations: vec![Observation {
                pose: Pose2d::new(x_m, 1.0, Rotation2d::default()),
                timestamp_s,
                tag_ids: tags,
            }],
            target_count: 1,
            latency_s: 0.02,
        }
    }

    fn camera(name: &str, script: Vec<CameraInputs>) -> (Box<dyn CameraIo>, Rc<RefCell<Option<Pose3d>>>) {
        let reference = Rc::new(RefCell::new(None));
        (
            Box::new(ScriptedCamera {
                name: name.into(),
                script,
                reference: reference.clone(),
            }),
            reference,
        )
    }

    fn localizer(clock: &Clock) -> Localizer {
        Localizer::new(Rc::new(RefCell::new(VisionHub::offline())), clock, 0.5)
    }

    #[test]
    fn test_recent_estimate_tracking() {
        let clock = Clock::manual();
        let mut loc = localizer(&clock);
        let (cam, _) = camera(
            "a",
            vec![
                CameraInputs::default(),
                CameraInputs::default(),
                seen(1.0, 0.55, vec![3]),
            ],
        );
        loc.add_camera(cam);

        // Nothing for the timeout
        loc.update();
        assert!(loc.has_had_recent_estimate());
        clock.advance(0.6);
        loc.update();
        assert!(!loc.has_had_recent_estimate());
        assert!(loc.estimated_poses().is_empty());

        // A single estimate counts in the same tick
        clock.advance(0.02);
        loc.update();
        assert!(loc.has_had_recent_estimate());
        assert_eq!(loc.estimated_poses().len(), 1);
        assert_eq!(loc.estimated_poses()[0].camera, "a");
        assert_eq!(loc.estimated_poses()[0].tag_ids, vec![3]);

        // And is cleared on the next
        loc.update();
        assert!(loc.estimated_poses().is_empty());
        assert!(loc.has_had_recent_estimate());
    }

    #[test]
    fn test_invalid_estimates_rejected() {
        let clock = Clock::manual();
        let mut loc = localizer(&clock);
        clock.advance(1.0);

        let mut bad = seen(std::f64::NAN, 1.0, vec![4]);
        bad.observations.push(seen(2.0, 1.0, vec![4]).observations.remove(0));
        let (a, _) = camera("a", vec![bad]);
        let (b, _) = camera("b", vec![seen(3.0, 1.0, vec![])]);
        let (c, _) = camera("c", vec![seen(4.0, 0.98, vec![5, 6])]);
        loc.add_camera(a);
        loc.add_camera(b);
        loc.add_camera(c);

        loc.update();

        // The whole of camera a is dropped, b has no tags
        let poses = loc.estimated_poses();
        assert_eq!(poses.len(), 1);
        assert_eq!(poses[0].camera, "c");
        assert!((poses[0].pose.x_m - 4.0).abs() < 1e-12);
        assert!(!loc.cameras[0].inputs.connected);
        assert_eq!(loc.cameras[0].num_rejected, 1);
    }

    #[test]
    fn test_no_valid_estimate_does_not_restart_timer() {
        let clock = Clock::manual();
        let mut loc = localizer(&clock);
        let (a, _) = camera("a", vec![seen(1.0, 0.0, vec![]); 40]);
        loc.add_camera(a);

        for _ in 0..30 {
            clock.advance(0.02);
            loc.update();
        }
        assert!(!loc.has_had_recent_estimate());
    }

    #[test]
    fn test_reference_broadcast() {
        let clock = Clock::manual();
        let mut loc = localizer(&clock);
        let (a, ref_a) = camera("a", vec![]);
        let (b, ref_b) = camera("b", vec![]);
        loc.add_camera(a);
        loc.add_camera(b);

        loc.update_with_reference_pose(&Pose2d::new(2.0, 3.0, Rotation2d::from_degrees(30.0)));

        for r in [ref_a, ref_b].iter() {
            let p = r.borrow().unwrap().to_pose2d();
            assert!((p.x_m - 2.0).abs() < 1e-9);
            assert!((p.heading.degrees() - 30.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_shipped_params() {
        let p: VisionParams = toml::from_str(include_str!("../../../params/vision.toml")).unwrap();
        assert_eq!(p.estimate_timeout_s, 0.5);
        assert_eq!(p.cameras.len(), 4);

        let clock = Clock::manual();
        let layout = Rc::new(FieldLayout::from_json(include_str!("../../../params/field_layout.json")).unwrap());
        let loc = Localizer::from_params(&p, Rc::new(RefCell::new(VisionHub::offline())), layout, &clock);
        assert_eq!(loc.num_cameras(), 4);
    }
}
