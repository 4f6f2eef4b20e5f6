//! # Trajectories
//!
//! Time parameterised paths produced offline. Each file is a JSON list of samples under
//! `$ROBOT_SW_ROOT/trajectories/`, always expressed from the blue alliance origin.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::ds::Alliance;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use util::{
    geom::{Pose2d, Rotation2d},
    maths::wrap_pi,
};

use super::ChassisSpeeds;
use crate::field::{alliance_convert, alliance_convert_speeds};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One point along a trajectory.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySample {
    /// Time from the start of the trajectory.
    ///
    /// Units: seconds
    #[serde(rename = "t")]
    pub t_s: f64,

    /// Units: meters, Frame: field
    #[serde(rename = "x")]
    pub x_m: f64,

    /// Units: meters, Frame: field
    #[serde(rename = "y")]
    pub y_m: f64,

    /// Units: radians, Frame: field
    #[serde(rename = "heading")]
    pub heading_rad: f64,

    /// Units: meters/second, Frame: field
    #[serde(rename = "vx")]
    pub vx_mps: f64,

    /// Units: meters/second, Frame: field
    #[serde(rename = "vy")]
    pub vy_mps: f64,

    /// Units: radians/second
    #[serde(rename = "omega")]
    pub omega_radps: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    name: String,
    samples: Vec<TrajectorySample>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TrajectoryError {
    #[error("The software root environment variable is not set")]
    SwRootNotSet,

    #[error("Cannot load trajectory file {0:?}: {1}")]
    FileLoadError(PathBuf, std::io::Error),

    #[error("Cannot parse trajectory file {0:?}: {1}")]
    ParseError(PathBuf, serde_json::Error),

    #[error("Trajectory {0} has no samples")]
    Empty(String),

    #[error("Trajectory {0} sample times are not increasing")]
    NotMonotonic(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TrajectorySample {
    pub fn pose(&self) -> Pose2d {
        Pose2d::new(self.x_m, self.y_m, Rotation2d::from_radians(self.heading_rad))
    }

    pub fn speeds(&self) -> ChassisSpeeds {
        ChassisSpeeds::new(self.vx_mps, self.vy_mps, self.omega_radps)
    }

    /// The same sample seen from the given alliance's origin.
    pub fn for_alliance(&self, alliance: Alliance) -> Self {
        let pose = alliance_convert(&self.pose(), alliance);
        let speeds = alliance_convert_speeds(&self.speeds(), alliance);
        Self {
            t_s: self.t_s,
            x_m: pose.x_m,
            y_m: pose.y_m,
            heading_rad: pose.heading.radians(),
            vx_mps: speeds.vx_mps,
            vy_mps: speeds.vy_mps,
            omega_radps: speeds.omega_radps,
        }
    }

    fn lerp(&self, end: &Self, k: f64) -> Self {
        let l = |a: f64, b: f64| a + (b - a) * k;
        Self {
            t_s: l(self.t_s, end.t_s),
            x_m: l(self.x_m, end.x_m),
            y_m: l(self.y_m, end.y_m),
            heading_rad: wrap_pi(self.heading_rad + wrap_pi(end.heading_rad - self.heading_rad) * k),
            vx_mps: l(self.vx_mps, end.vx_mps),
            vy_mps: l(self.vy_mps, end.vy_mps),
            omega_radps: l(self.omega_radps, end.omega_radps),
        }
    }
}

impl Trajectory {
    /// Build a trajectory, checking the samples are non-empty and increasing in time.
    pub fn new(name: &str, samples: Vec<TrajectorySample>) -> Result<Self, TrajectoryError> {
        if samples.is_empty() {
            return Err(TrajectoryError::Empty(name.to_string()));
        }
        if samples.windows(2).any(|w| w[1].t_s <= w[0].t_s) {
            return Err(TrajectoryError::NotMonotonic(name.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            samples,
        })
    }

    /// Load `trajectories/<name>.json` from the software root.
    pub fn load(name: &str) -> Result<Self, TrajectoryError> {
        let mut path = util::host::get_robot_sw_root().map_err(|_| TrajectoryError::SwRootNotSet)?;
        path.push("trajectories");
        path.push(format!("{}.json", name));
        Self::load_path(name, &path)
    }

    pub fn load_path<P: AsRef<Path>>(name: &str, path: P) -> Result<Self, TrajectoryError> {
        let path = path.as_ref().to_path_buf();
        let s = std::fs::read_to_string(&path)
            .map_err(|e| TrajectoryError::FileLoadError(path.clone(), e))?;
        let samples = serde_json::from_str(&s).map_err(|e| TrajectoryError::ParseError(path, e))?;
        Self::new(name, samples)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Units: seconds
    pub fn total_time_s(&self) -> f64 {
        self.samples.last().map(|s| s.t_s).unwrap_or(0.0)
    }

    pub fn initial_sample(&self) -> TrajectorySample {
        self.samples.first().copied().unwrap_or_default()
    }

    /// The sample at `t_s` seconds from the start, linearly interpolated and clamped to the ends.
    pub fn sample(&self, t_s: f64) -> TrajectorySample {
        let first = self.initial_sample();
        if t_s <= first.t_s {
            return first;
        }

        // Index of the first sample after t
        let idx = self.samples.partition_point(|s| s.t_s <= t_s);
        if idx >= self.samples.len() {
            return self.samples.last().copied().unwrap_or_default();
        }

        let a = &self.samples[idx - 1];
        let b = &self.samples[idx];
        a.lerp(b, (t_s - a.t_s) / (b.t_s - a.t_s))
    }

    /// This trajectory as seen from the given alliance's origin.
    pub fn for_alliance(&self, alliance: Alliance) -> Self {
        Self {
            name: self.name.clone(),
            samples: self.samples.iter().map(|s| s.for_alliance(alliance)).collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const JSON: &str = r#"[
        {"t": 0.0, "x": 1.0, "y": 1.0, "heading": 0.0, "vx": 0.0, "vy": 0.0, "omega": 0.0},
        {"t": 1.0, "x": 2.0, "y": 1.0, "heading": 0.0, "vx": 1.0, "vy": 0.0, "omega": 0.0},
        {"t": 2.0, "x": 3.0, "y": 2.0, "heading": 1.0, "vx": 0.0, "vy": 0.0, "omega": 0.0}
    ]"#;

    fn traj() -> Trajectory {
        Trajectory::new("test", serde_json::from_str(JSON).unwrap()).unwrap()
    }

    #[test]
    fn test_sample_interpolates_and_clamps() {
        let t = traj();
        assert_eq!(t.total_time_s(), 2.0);

        let s = t.sample(0.5);
        assert!((s.x_m - 1.5).abs() < 1e-12);
        assert!((s.vx_mps - 0.5).abs() < 1e-12);

        let s = t.sample(1.5);
        assert!((s.y_m - 1.5).abs() < 1e-12);
        assert!((s.heading_rad - 0.5).abs() < 1e-12);

        assert_eq!(t.sample(-1.0), t.initial_sample());
        assert_eq!(t.sample(10.0).x_m, 3.0);
    }

    #[test]
    fn test_red_flip() {
        let t = traj().for_alliance(Alliance::Red);
        let s = t.sample(1.0);
        assert!((s.x_m - (crate::field::FIELD_LENGTH_M - 2.0)).abs() < 1e-9);
        assert!((s.vx_mps + 1.0).abs() < 1e-12);
        assert!((s.heading_rad.abs() - std::f64::consts::PI).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_bad_samples() {
        assert!(matches!(
            Trajectory::new("empty", vec![]),
            Err(TrajectoryError::Empty(_))
        ));
        let s = TrajectorySample::default();
        assert!(matches!(
            Trajectory::new("flat", vec![s, s]),
            Err(TrajectoryError::NotMonotonic(_))
        ));
    }
}
