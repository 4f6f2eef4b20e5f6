//! # Pose estimator
//!
//! Fuses wheel odometry with vision measurements which arrive late.
//!
//! Every odometry update appends a sample `(t, pose, module positions, gyro)` to a buffer covering
//! the last [`PoseEstimator::horizon_s`] seconds. A vision measurement stamped `t_v` is blended
//! with the buffered sample nearest `t_v`, and every later sample is moved by the same
//! correction, so the newest sample is the current fused pose.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::trace;
use std::collections::VecDeque;
use thiserror::Error;
use util::geom::{Pose2d, Rotation2d, Twist2d};

use super::{SwerveKinematics, SwerveModulePosition, NUM_MODULES};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Two samples closer than this to a vision timestamp are treated as equally near.
const TIE_EPSILON_S: f64 = 1e-9;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Standard deviations of a pose measurement, `[x (m), y (m), heading (rad)]`.
pub type StdDevs = [f64; 3];

/// Module readings for one odometry sample. `None` for modules which could not be read.
pub type ModulePositions = [Option<SwerveModulePosition>; NUM_MODULES];

#[derive(Debug, Clone)]
pub struct PoseEstimator {
    kinematics: SwerveKinematics,

    /// Kalman gain per axis applied to vision corrections
    vision_gain: [f64; 3],

    /// Units: seconds
    horizon_s: f64,

    /// Measurements further than this from the odometry estimate are discarded once the pose has
    /// been seeded.
    ///
    /// Units: meters
    max_jump_m: Option<f64>,

    /// Set once the pose has been explicitly reset
    seeded: bool,

    buffer: VecDeque<OdometrySample>,
}

#[derive(Debug, Copy, Clone, PartialEq)]
struct OdometrySample {
    time_s: f64,
    pose: Pose2d,
    positions: ModulePositions,
    gyro: Option<Rotation2d>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum EstimatorError {
    #[error("No odometry has been recorded yet")]
    NoOdometry,

    #[error("Odometry sample at {time_s} s is not after the newest sample at {newest_s} s")]
    NotMonotonic { time_s: f64, newest_s: f64 },

    #[error("Vision measurement is not finite: {0:?}")]
    NonFinite(Pose2d),

    #[error("Vision measurement at {timestamp_s} s is older than the buffer (oldest {oldest_s} s)")]
    TooOld { timestamp_s: f64, oldest_s: f64 },

    #[error("Vision measurement is {distance_m:.2} m from the odometry estimate")]
    Jump { distance_m: f64 },

    #[error("Pose estimator buffer is corrupt: {0}")]
    BufferCorrupt(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PoseEstimator {
    pub fn new(
        kinematics: SwerveKinematics,
        odometry_std_devs: StdDevs,
        vision_std_devs: StdDevs,
        horizon_s: f64,
        max_jump_m: Option<f64>,
    ) -> Self {
        let mut est = Self {
            kinematics,
            vision_gain: [0.0; 3],
            horizon_s,
            max_jump_m,
            seeded: false,
            buffer: VecDeque::new(),
        };
        est.set_std_devs(odometry_std_devs, vision_std_devs);
        est
    }

    /// Set the trust in odometry against vision. The gain on each axis is `σo² / (σo² + σv²)`.
    pub fn set_std_devs(&mut self, odometry: StdDevs, vision: StdDevs) {
        for i in 0..3 {
            let q = odometry[i] * odometry[i];
            let r = vision[i] * vision[i];
            self.vision_gain[i] = if q + r > 0.0 { q / (q + r) } else { 0.0 };
        }
    }

    pub fn vision_gain(&self) -> [f64; 3] {
        self.vision_gain
    }

    /// Units: seconds
    pub fn horizon_s(&self) -> f64 {
        self.horizon_s
    }

    /// True once the pose has been reset to a known position.
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// The current fused pose. The origin before any odometry.
    pub fn pose(&self) -> Pose2d {
        self.buffer.back().map(|s| s.pose).unwrap_or_default()
    }

    /// Time of the newest odometry sample.
    pub fn latest_time_s(&self) -> Option<f64> {
        self.buffer.back().map(|s| s.time_s)
    }

    pub fn num_samples(&self) -> usize {
        self.buffer.len()
    }

    /// Module readings of the newest odometry sample.
    pub fn latest_positions(&self) -> Option<ModulePositions> {
        self.buffer.back().map(|s| s.positions)
    }

    /// Forget the history and restart from `pose`.
    pub fn reset_pose(
        &mut self,
        pose: Pose2d,
        time_s: f64,
        gyro: Option<Rotation2d>,
        positions: ModulePositions,
    ) {
        self.buffer.clear();
        self.buffer.push_back(OdometrySample {
            time_s,
            pose,
            positions,
            gyro,
        });
        self.seeded = true;
    }

    /// Keep the current translation and redefine the heading.
    pub fn reset_rotation(&mut self, heading: Rotation2d) -> Result<(), EstimatorError> {
        let newest = *self.buffer.back().ok_or(EstimatorError::NoOdometry)?;
        let pose = Pose2d::new(newest.pose.x_m, newest.pose.y_m, heading);
        self.buffer.clear();
        self.buffer.push_back(OdometrySample { pose, ..newest });
        Ok(())
    }

    /// Add an odometry sample and return the new fused pose.
    ///
    /// The heading change comes from the gyro when both this and the previous sample have a
    /// reading, otherwise from the modules.
    pub fn update(
        &mut self,
        time_s: f64,
        gyro: Option<Rotation2d>,
        positions: ModulePositions,
    ) -> Result<Pose2d, EstimatorError> {
        let prev = match self.buffer.back() {
            Some(p) => *p,
            None => {
                // First sample starts at the origin, unseeded
                self.buffer.push_back(OdometrySample {
                    time_s,
                    pose: Pose2d::default(),
                    positions,
                    gyro,
                });
                return Ok(Pose2d::default());
            }
        };

        if time_s <= prev.time_s {
            return Err(EstimatorError::NotMonotonic {
                time_s,
                newest_s: prev.time_s,
            });
        }

        let mut deltas: ModulePositions = [None; NUM_MODULES];
        for (i, d) in deltas.iter_mut().enumerate() {
            if let (Some(now), Some(before)) = (positions[i], prev.positions[i]) {
                *d = Some(SwerveModulePosition::new(
                    now.distance_m - before.distance_m,
                    now.angle,
                ));
            }
        }

        let mut twist: Twist2d = self.kinematics.to_twist(&deltas);
        if let (Some(g), Some(pg)) = (gyro, prev.gyro) {
            twist.dtheta_rad = (g - pg).radians();
        }

        let pose = prev.pose.exp(&twist);
        if !pose.is_finite() {
            return Err(EstimatorError::BufferCorrupt(format!(
                "odometry produced a non-finite pose {:?} from {:?}",
                pose, twist
            )));
        }

        // A missing gyro reading keeps the last good one so the next delta spans the gap
        let gyro = gyro.or(prev.gyro);

        self.buffer.push_back(OdometrySample {
            time_s,
            pose,
            positions,
            gyro,
        });

        while let Some(front) = self.buffer.front() {
            if front.time_s < time_s - self.horizon_s {
                self.buffer.pop_front();
            } else {
                break;
            }
        }

        Ok(pose)
    }

    /// Blend a vision pose stamped `timestamp_s` into the history and return the new fused
    /// pose.
    ///
    /// Measurements newer than the newest sample are treated as current. Equal timestamps are
    /// applied in call order, each seeing the previous correction.
    pub fn add_vision_measurement(
        &mut self,
        vision: &Pose2d,
        timestamp_s: f64,
    ) -> Result<Pose2d, EstimatorError> {
        if !vision.is_finite() || !timestamp_s.is_finite() {
            return Err(EstimatorError::NonFinite(*vision));
        }

        let (oldest_s, newest_s) = match (self.buffer.front(), self.buffer.back()) {
            (Some(o), Some(n)) => (o.time_s, n.time_s),
            _ => return Err(EstimatorError::NoOdometry),
        };

        if timestamp_s < oldest_s {
            return Err(EstimatorError::TooOld {
                timestamp_s,
                oldest_s,
            });
        }
        let t_v = timestamp_s.min(newest_s);

        let k = self.nearest_index(t_v)?;
        let odom_at_tv = self.buffer[k].pose;

        if let (true, Some(max)) = (self.seeded, self.max_jump_m) {
            let distance_m = odom_at_tv.distance_to(vision);
            if distance_m >= max {
                return Err(EstimatorError::Jump { distance_m });
            }
        }

        // Gaussian merge in the tangent space at the odometry sample
        let innovation = odom_at_tv.log(vision);
        let step = Twist2d {
            dx_m: innovation.dx_m * self.vision_gain[0],
            dy_m: innovation.dy_m * self.vision_gain[1],
            dtheta_rad: innovation.dtheta_rad * self.vision_gain[2],
        };
        let corrected = odom_at_tv.exp(&step);

        trace!(
            "Vision at {:.3} s merged against sample at {:.3} s: {:?} -> {:?}",
            timestamp_s,
            self.buffer[k].time_s,
            odom_at_tv,
            corrected
        );

        // Carry the correction through every later sample
        for sample in self.buffer.iter_mut().skip(k) {
            let delta = sample.pose.relative_to(&odom_at_tv);
            sample.pose = corrected.transform_by(&delta);
            if !sample.pose.is_finite() {
                return Err(EstimatorError::BufferCorrupt(format!(
                    "replay produced a non-finite pose at {} s",
                    sample.time_s
                )));
            }
        }

        Ok(self.pose())
    }

    /// Index of the sample nearest `time_s`, the later one on a tie.
    fn nearest_index(&self, time_s: f64) -> Result<usize, EstimatorError> {
        let idx = self.buffer.partition_point(|s| s.time_s < time_s);

        if idx > 0 && idx < self.buffer.len() && self.buffer[idx - 1].time_s > self.buffer[idx].time_s
        {
            return Err(EstimatorError::BufferCorrupt(String::from(
                "samples are not in time order",
            )));
        }

        if idx == 0 {
            return Ok(0);
        }
        if idx >= self.buffer.len() {
            return Ok(self.buffer.len() - 1);
        }

        let before = time_s - self.buffer[idx - 1].time_s;
        let after = self.buffer[idx].time_s - time_s;

        if after <= before + TIE_EPSILON_S {
            Ok(idx)
        } else {
            Ok(idx - 1)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn kinematics() -> SwerveKinematics {
        SwerveKinematics::new([[0.3, 0.3], [0.3, -0.3], [-0.3, 0.3], [-0.3, -0.3]])
    }

    fn positions(distance_m: f64) -> ModulePositions {
        [Some(SwerveModulePosition::new(distance_m, Rotation2d::default())); NUM_MODULES]
    }

    /// Samples at 1.00, 1.02 and 1.04 s at x = 0, 0.1, 0.2.
    fn scenario_estimator(vision_std: StdDevs) -> PoseEstimator {
        let mut est = PoseEstimator::new(kinematics(), [0.01; 3], vision_std, 1.5, None);
        let gyro = Some(Rotation2d::default());
        est.reset_pose(Pose2d::default(), 1.00, gyro, positions(0.0));
        est.update(1.02, gyro, positions(0.1)).unwrap();
        est.update(1.04, gyro, positions(0.2)).unwrap();
        est
    }

    #[test]
    fn test_odometry_integrates() {
        let est = scenario_estimator([0.01; 3]);
        assert_eq!(est.num_samples(), 3);
        assert!((est.pose().x_m - 0.2).abs() < 1e-12);
        assert_eq!(est.latest_time_s(), Some(1.04));
    }

    #[test]
    fn test_vision_back_dating() {
        let mut est = scenario_estimator([0.01; 3]);
        assert_eq!(est.vision_gain(), [0.5; 3]);

        let fused = est
            .add_vision_measurement(&Pose2d::new(0.05, 0.0, Rotation2d::default()), 1.01)
            .unwrap();

        // Merged at the 1.02 s sample (0.1 + 0.05) / 2, then replayed forward 0.1
        assert!((est.buffer[1].pose.x_m - 0.075).abs() < 1e-9);
        assert!((fused.x_m - 0.175).abs() < 1e-9);
        assert!(fused.y_m.abs() < 1e-9);
        assert!(fused.heading.radians().abs() < 1e-9);

        // Later odometry continues from the corrected pose
        let pose = est
            .update(1.06, Some(Rotation2d::default()), positions(0.3))
            .unwrap();
        assert!((pose.x_m - 0.275).abs() < 1e-9);
    }

    #[test]
    fn test_equal_timestamps_apply_in_order() {
        let mut est = scenario_estimator([0.01; 3]);
        let v = Pose2d::new(0.0, 0.0, Rotation2d::default());
        est.add_vision_measurement(&v, 1.04).unwrap();
        assert!((est.pose().x_m - 0.1).abs() < 1e-9);
        est.add_vision_measurement(&v, 1.04).unwrap();
        assert!((est.pose().x_m - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_rejected_measurements_leave_pose() {
        let mut est = scenario_estimator([0.01; 3]);
        let before = est.pose();

        assert!(matches!(
            est.add_vision_measurement(&Pose2d::new(f64::NAN, 0.0, Rotation2d::default()), 1.02),
            Err(EstimatorError::NonFinite(_))
        ));
        assert!(matches!(
            est.add_vision_measurement(&Pose2d::default(), 0.5),
            Err(EstimatorError::TooOld { .. })
        ));
        assert_eq!(est.pose(), before);
    }

    #[test]
    fn test_future_measurement_clamped_to_now() {
        let mut est = scenario_estimator([0.01; 3]);
        let fused = est
            .add_vision_measurement(&Pose2d::new(0.4, 0.0, Rotation2d::default()), 5.0)
            .unwrap();
        assert!((fused.x_m - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_jump_rejected_once_seeded() {
        let mut est = PoseEstimator::new(kinematics(), [0.01; 3], [0.01; 3], 1.5, Some(1.0));
        let far = Pose2d::new(5.0, 0.0, Rotation2d::default());

        // Unseeded: the first odometry sample starts at the origin and anything is accepted
        est.update(0.0, None, positions(0.0)).unwrap();
        assert!(est.add_vision_measurement(&far, 0.0).is_ok());

        est.reset_pose(Pose2d::default(), 1.0, None, positions(0.0));
        assert!(matches!(
            est.add_vision_measurement(&far, 1.0),
            Err(EstimatorError::Jump { .. })
        ));
    }

    #[test]
    fn test_buffer_horizon() {
        let mut est = PoseEstimator::new(kinematics(), [0.01; 3], [0.1; 3], 0.11, None);
        est.reset_pose(Pose2d::default(), 0.0, None, positions(0.0));
        for i in 1..=20 {
            est.update(i as f64 * 0.02, None, positions(0.0)).unwrap();
        }
        // Samples from 0.3 to 0.4 s remain
        assert_eq!(est.num_samples(), 6);
        assert!(matches!(
            est.update(0.1, None, positions(0.0)),
            Err(EstimatorError::NotMonotonic { .. })
        ));
    }

    #[test]
    fn test_missing_module_zero_weighted() {
        let mut est = PoseEstimator::new(kinematics(), [0.01; 3], [0.1; 3], 1.5, None);
        est.reset_pose(Pose2d::default(), 0.0, None, positions(0.0));

        let mut p = positions(0.1);
        p[2] = None;
        let pose = est.update(0.02, None, p).unwrap();
        assert!((pose.x_m - 0.1).abs() < 1e-9);
        assert!(pose.heading.radians().abs() < 1e-9);
    }

    #[test]
    fn test_reset_rotation() {
        let mut est = scenario_estimator([0.01; 3]);
        est.reset_rotation(Rotation2d::from_degrees(180.0)).unwrap();
        assert_eq!(est.num_samples(), 1);
        assert!((est.pose().x_m - 0.2).abs() < 1e-12);
        assert!((est.pose().heading.degrees().abs() - 180.0).abs() < 1e-9);
    }
}
