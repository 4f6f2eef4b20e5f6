//! # Robot Executable Parameters
//!
//! This module provides parameters for the robot executable, loaded from `robot_exec.toml`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;
use util::logger::LoggerParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RobotExecParams {
    /// Text logging configuration
    #[serde(default)]
    pub logger: LoggerParams,

    /// Period of the main tick.
    ///
    /// Units: seconds
    pub cycle_period_s: f64,

    /// Rate of the odometry thread.
    ///
    /// Units: Hertz
    pub odometry_rate_hz: f64,

    /// Path to the device identity file used to choose the robot variant
    pub device_id_path: String,

    /// Vision estimates older than this are not forwarded to the drivetrain.
    ///
    /// Units: seconds
    pub max_estimate_age_s: f64,

    /// Time without a driver station packet before the robot is made safe.
    ///
    /// Units: seconds
    pub ds_timeout_s: f64,

    /// Preferences file, relative to the software root
    pub prefs_file: String,

    /// Write telemetry to a CSV archive in the session directory
    pub tm_archive: bool,

    /// Publish telemetry over the network
    pub tm_network: bool,

    /// Name of the trajectory followed in autonomous, if any
    #[serde(default)]
    pub auto_trajectory: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_shipped_params_parse() {
        let p: RobotExecParams =
            toml::from_str(include_str!("../../params/robot_exec.toml")).unwrap();
        assert_eq!(p.cycle_period_s, 0.02);
        assert_eq!(p.odometry_rate_hz, 200.0);
        assert_eq!(p.device_id_path, "/home/admin/robot_settings.txt");
        assert_eq!(p.max_estimate_age_s, 0.5);
    }
}
