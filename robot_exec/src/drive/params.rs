//! Parameters structure for the swerve drive, loaded from `drive.toml`

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use super::{PidGains, StdDevs, NUM_MODULES};
use crate::hal::MotorConfig;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for the swerve drive.
#[derive(Debug, Clone, Deserialize)]
pub struct DriveParams {
    // ---- GEOMETRY ----
    /// Units: meters
    pub wheel_radius_m: f64,

    /// The modules, front left, front right, back left, back right
    pub modules: [ModuleParams; NUM_MODULES],

    // ---- CAPABILITIES ----
    /// Top translation speed requested by the driver.
    ///
    /// Units: meters/second
    pub max_speed_mps: f64,

    /// Top rotation rate requested by the driver.
    ///
    /// Units: radians/second
    pub max_rotation_radps: f64,

    /// Module speeds are scaled down to keep every module below this.
    ///
    /// Units: meters/second
    pub module_max_speed_mps: f64,

    // ---- ESTIMATION ----
    /// Standard deviations of the odometry, `[x (m), y (m), heading (rad)]`
    pub odometry_std_devs: StdDevs,

    /// Standard deviations of vision measurements, `[x (m), y (m), heading (rad)]`
    pub vision_std_devs: StdDevs,

    /// Length of odometry history vision can be back-dated into.
    ///
    /// Units: seconds
    pub estimator_horizon_s: f64,

    /// Vision measurements this far from the odometry estimate are discarded.
    ///
    /// Units: meters
    #[serde(default)]
    pub vision_max_jump_m: Option<f64>,

    // ---- CONTROL ----
    /// Gains of the trajectory follower's x and y controllers
    pub translation_pid: PidGains,

    /// Gains of the trajectory follower's heading controller
    pub rotation_pid: PidGains,

    /// Drive motor configuration, shared by all modules
    pub drive_motor: MotorConfig,

    /// Steer motor configuration, shared by all modules
    pub steer_motor: MotorConfig,
}

/// Parameters of one swerve module.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleParams {
    pub name: String,

    /// Position in the robot frame, x forward, y left.
    ///
    /// Units: meters
    pub location_m: [f64; 2],

    /// Preferences key the steer offset is saved under
    pub offset_pref_key: String,

    /// Magnet mounting angle of the simulated absolute encoder.
    ///
    /// Units: degrees
    #[serde(default)]
    pub sim_mount_deg: f64,
}

impl DriveParams {
    /// Units: meters
    pub fn wheel_circumference_m(&self) -> f64 {
        2.0 * std::f64::consts::PI * self.wheel_radius_m
    }

    pub fn module_locations_m(&self) -> [[f64; 2]; NUM_MODULES] {
        let mut locs = [[0.0; 2]; NUM_MODULES];
        for (l, m) in locs.iter_mut().zip(self.modules.iter()) {
            *l = m.location_m;
        }
        locs
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_shipped_params_parse() {
        let p: DriveParams = toml::from_str(include_str!("../../../params/drive.toml")).unwrap();
        assert_eq!(p.max_speed_mps, 3.0);
        assert_eq!(p.max_rotation_radps, 10.0);
        assert_eq!(p.odometry_std_devs, [0.01, 0.01, 0.01]);
        assert_eq!(p.vision_std_devs, [0.1, 0.1, 9999999.0]);
        assert_eq!(p.estimator_horizon_s, 1.5);
        assert_eq!(p.translation_pid.kp, 0.5);
        assert_eq!(p.rotation_pid.kp, 0.1);
        assert_eq!(p.modules[0].offset_pref_key, "FrontLeftOffset");
        assert_eq!(p.modules[3].offset_pref_key, "BackRightOffset");
    }
}
