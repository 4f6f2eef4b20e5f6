//! # Geometry
//!
//! Planar (SE(2)) and spatial (SE(3)) poses used by the drivetrain and the localiser. Poses are
//! stored as plain fields so they serialise cleanly, all composition goes through nalgebra
//! isometries.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::{
    eqpt::vision::Transform3,
    tm::{pack_f64s, unpack_f64s, TmStruct},
};
use nalgebra::{
    Isometry2, Isometry3, Quaternion, Translation2, Translation3, UnitComplex, UnitQuaternion, Vector3,
};
use serde::{Deserialize, Serialize};

use crate::maths::wrap_pi;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A planar rotation, stored as an angle in `[-pi, pi)`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rotation2d {
    rad: f64,
}

/// A planar pose.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose2d {
    /// Units: meters
    pub x_m: f64,

    /// Units: meters
    pub y_m: f64,

    pub heading: Rotation2d,
}

/// A change in pose along a constant curvature arc, in the pose's own frame.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Twist2d {
    /// Units: meters
    pub dx_m: f64,

    /// Units: meters
    pub dy_m: f64,

    /// Units: radians
    pub dtheta_rad: f64,
}

/// A pose in 3D space.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pose3d {
    iso: Isometry3<f64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Rotation2d {
    pub fn from_radians(rad: f64) -> Self {
        Self { rad: wrap_pi(rad) }
    }

    pub fn from_degrees(deg: f64) -> Self {
        Self::from_radians(deg.to_radians())
    }

    /// Rotation pointing along the vector `(x, y)`.
    pub fn from_xy(x: f64, y: f64) -> Self {
        Self::from_radians(y.atan2(x))
    }

    pub fn radians(&self) -> f64 {
        self.rad
    }

    pub fn degrees(&self) -> f64 {
        self.rad.to_degrees()
    }

    pub fn cos(&self) -> f64 {
        self.rad.cos()
    }

    pub fn sin(&self) -> f64 {
        self.rad.sin()
    }

    /// Compose two rotations.
    pub fn rotate_by(&self, other: &Rotation2d) -> Self {
        Self::from_radians(self.rad + other.rad)
    }

    pub fn inverse(&self) -> Self {
        Self::from_radians(-self.rad)
    }

    /// Rotate the vector `(x, y)` by this rotation.
    pub fn rotate_xy(&self, x: f64, y: f64) -> (f64, f64) {
        let (s, c) = self.rad.sin_cos();
        (x * c - y * s, x * s + y * c)
    }
}

impl std::ops::Add for Rotation2d {
    type Output = Rotation2d;

    fn add(self, rhs: Rotation2d) -> Rotation2d {
        self.rotate_by(&rhs)
    }
}

impl std::ops::Sub for Rotation2d {
    type Output = Rotation2d;

    fn sub(self, rhs: Rotation2d) -> Rotation2d {
        self.rotate_by(&rhs.inverse())
    }
}

impl std::ops::Neg for Rotation2d {
    type Output = Rotation2d;

    fn neg(self) -> Rotation2d {
        self.inverse()
    }
}

impl Pose2d {
    pub fn new(x_m: f64, y_m: f64, heading: Rotation2d) -> Self {
        Self { x_m, y_m, heading }
    }

    pub fn to_isometry(&self) -> Isometry2<f64> {
        Isometry2::from_parts(
            Translation2::new(self.x_m, self.y_m),
            UnitComplex::new(self.heading.radians()),
        )
    }

    pub fn from_isometry(iso: &Isometry2<f64>) -> Self {
        Self {
            x_m: iso.translation.vector.x,
            y_m: iso.translation.vector.y,
            heading: Rotation2d::from_radians(iso.rotation.angle()),
        }
    }

    /// Apply `other` expressed in this pose's frame, i.e. `self * other`.
    pub fn transform_by(&self, other: &Pose2d) -> Pose2d {
        Self::from_isometry(&(self.to_isometry() * other.to_isometry()))
    }

    /// Express this pose in the frame of `origin`, i.e. `origin^-1 * self`.
    pub fn relative_to(&self, origin: &Pose2d) -> Pose2d {
        Self::from_isometry(&(origin.to_isometry().inverse() * self.to_isometry()))
    }

    pub fn inverse(&self) -> Pose2d {
        Self::from_isometry(&self.to_isometry().inverse())
    }

    /// Distance between the translations of two poses.
    ///
    /// Units: meters
    pub fn distance_to(&self, other: &Pose2d) -> f64 {
        (self.x_m - other.x_m).hypot(self.y_m - other.y_m)
    }

    /// Follow a twist from this pose.
    pub fn exp(&self, twist: &Twist2d) -> Pose2d {
        let dtheta = twist.dtheta_rad;
        let (sin_theta, cos_theta) = dtheta.sin_cos();

        let (s, c) = if dtheta.abs() < 1e-9 {
            (1.0 - dtheta * dtheta / 6.0, 0.5 * dtheta)
        } else {
            (sin_theta / dtheta, (1.0 - cos_theta) / dtheta)
        };

        let delta = Pose2d::new(
            twist.dx_m * s - twist.dy_m * c,
            twist.dx_m * c + twist.dy_m * s,
            Rotation2d::from_radians(dtheta),
        );

        self.transform_by(&delta)
    }

    /// The twist which takes this pose to `end`.
    pub fn log(&self, end: &Pose2d) -> Twist2d {
        let transform = end.relative_to(self);
        let dtheta = transform.heading.radians();
        let half_dtheta = dtheta / 2.0;
        let cos_minus_one = dtheta.cos() - 1.0;

        let half_theta_by_tan = if cos_minus_one.abs() < 1e-9 {
            1.0 - dtheta * dtheta / 12.0
        } else {
            -(half_dtheta * dtheta.sin()) / cos_minus_one
        };

        let scale = half_theta_by_tan.hypot(half_dtheta);
        let rot = Rotation2d::from_xy(half_theta_by_tan, -half_dtheta);
        let (x, y) = rot.rotate_xy(transform.x_m, transform.y_m);

        Twist2d {
            dx_m: x * scale,
            dy_m: y * scale,
            dtheta_rad: dtheta,
        }
    }

    /// Linear interpolation between two poses, `t` in `[0, 1]`.
    pub fn interpolate(&self, end: &Pose2d, t: f64) -> Pose2d {
        let t = t.max(0.0).min(1.0);
        let twist = self.log(end);
        self.exp(&twist.scaled(t))
    }

    /// True if every component is finite.
    pub fn is_finite(&self) -> bool {
        self.x_m.is_finite() && self.y_m.is_finite() && self.heading.radians().is_finite()
    }
}

impl Twist2d {
    pub fn scaled(&self, k: f64) -> Twist2d {
        Twist2d {
            dx_m: self.dx_m * k,
            dy_m: self.dy_m * k,
            dtheta_rad: self.dtheta_rad * k,
        }
    }
}

impl TmStruct for Pose2d {
    fn type_name() -> &'static str {
        "Pose2d"
    }

    fn pack(&self, buf: &mut Vec<u8>) {
        pack_f64s(buf, &[self.x_m, self.y_m, self.heading.radians()]);
    }

    fn unpack(buf: &mut &[u8]) -> std::io::Result<Self> {
        let [x, y, theta] = unpack_f64s::<3>(buf)?;
        Ok(Pose2d::new(x, y, Rotation2d::from_radians(theta)))
    }
}

impl Pose3d {
    pub fn identity() -> Self {
        Self {
            iso: Isometry3::identity(),
        }
    }

    /// Build from a translation and roll, pitch, yaw angles.
    ///
    /// Units: meters, radians
    pub fn from_xyz_rpy(x_m: f64, y_m: f64, z_m: f64, roll: f64, pitch: f64, yaw: f64) -> Self {
        Self {
            iso: Isometry3::from_parts(
                Translation3::new(x_m, y_m, z_m),
                UnitQuaternion::from_euler_angles(roll, pitch, yaw),
            ),
        }
    }

    /// Build from a translation and a (not necessarily normalised) quaternion.
    pub fn from_xyz_quat(x_m: f64, y_m: f64, z_m: f64, w: f64, i: f64, j: f64, k: f64) -> Self {
        Self {
            iso: Isometry3::from_parts(
                Translation3::new(x_m, y_m, z_m),
                UnitQuaternion::from_quaternion(Quaternion::new(w, i, j, k)),
            ),
        }
    }

    /// Lift a planar pose onto the floor plane.
    pub fn from_pose2d(pose: &Pose2d) -> Self {
        Self::from_xyz_rpy(pose.x_m, pose.y_m, 0.0, 0.0, 0.0, pose.heading.radians())
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.iso.translation.vector
    }

    /// Roll, pitch, yaw angles.
    ///
    /// Units: radians
    pub fn rpy(&self) -> (f64, f64, f64) {
        self.iso.rotation.euler_angles()
    }

    /// Project onto the floor plane.
    pub fn to_pose2d(&self) -> Pose2d {
        let t = self.translation();
        Pose2d::new(t.x, t.y, Rotation2d::from_radians(self.rpy().2))
    }

    /// `self * other`
    pub fn transform_by(&self, other: &Pose3d) -> Pose3d {
        Self {
            iso: self.iso * other.iso,
        }
    }

    pub fn inverse(&self) -> Pose3d {
        Self {
            iso: self.iso.inverse(),
        }
    }

    /// Distance between the translations of two poses.
    pub fn distance_to(&self, other: &Pose3d) -> f64 {
        (self.translation() - other.translation()).norm()
    }

    pub fn is_finite(&self) -> bool {
        self.translation().iter().all(|v| v.is_finite())
            && self.iso.rotation.coords.iter().all(|v| v.is_finite())
    }

    /// The pose as a wire transform.
    pub fn to_transform3(&self) -> Transform3 {
        let t = self.translation();
        let q = self.iso.rotation.quaternion();
        Transform3 {
            x_m: t.x,
            y_m: t.y,
            z_m: t.z,
            qw: q.w,
            qx: q.i,
            qy: q.j,
            qz: q.k,
        }
    }
}

impl Default for Pose3d {
    fn default() -> Self {
        Self::identity()
    }
}

impl From<&Transform3> for Pose3d {
    fn from(t: &Transform3) -> Self {
        Pose3d::from_xyz_quat(t.x_m, t.y_m, t.z_m, t.qw, t.qx, t.qy, t.qz)
    }
}

impl TmStruct for Pose3d {
    fn type_name() -> &'static str {
        "Pose3d"
    }

    /// Translation then the rotation quaternion `w, x, y, z`.
    fn pack(&self, buf: &mut Vec<u8>) {
        let t = self.to_transform3();
        pack_f64s(buf, &[t.x_m, t.y_m, t.z_m, t.qw, t.qx, t.qy, t.qz]);
    }

    fn unpack(buf: &mut &[u8]) -> std::io::Result<Self> {
        let [x, y, z, w, i, j, k] = unpack_f64s::<7>(buf)?;
        Ok(Pose3d::from_xyz_quat(x, y, z, w, i, j, k))
    }
}
