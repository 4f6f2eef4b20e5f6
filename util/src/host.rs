//! Host platform utility functions
//!
//! Locating the software root and reading the device identity file.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Environment variable pointing at the root of the robot software tree.
pub const SW_ROOT_ENV_VAR: &str = "ROBOT_SW_ROOT";

/// Default location of the device identity file written during robot imaging.
pub const DEFAULT_DEVICE_ID_PATH: &str = "/home/admin/robot_settings.txt";

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum HostError {
    #[error("The software root environment variable ({}) is not set", SW_ROOT_ENV_VAR)]
    SwRootNotSet,

    #[error("The device identity file {0:?} does not exist")]
    DeviceIdMissing(PathBuf),

    #[error("Could not read the device identity file {0:?}: {1}")]
    DeviceIdRead(PathBuf, std::io::Error),

    #[error("The device identity file {0:?} is empty")]
    DeviceIdEmpty(PathBuf),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the root directory of the robot software from the environment.
pub fn get_robot_sw_root() -> Result<PathBuf, HostError> {
    std::env::var_os(SW_ROOT_ENV_VAR)
        .map(PathBuf::from)
        .ok_or(HostError::SwRootNotSet)
}

/// Read the device id from the first line of the identity file.
///
/// Surrounding whitespace is stripped, case is preserved.
pub fn read_device_id<P: AsRef<Path>>(path: P) -> Result<String, HostError> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(HostError::DeviceIdMissing(path.to_path_buf()));
    }

    let contents =
        fs::read_to_string(path).map_err(|e| HostError::DeviceIdRead(path.to_path_buf(), e))?;

    match contents.lines().next().map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(HostError::DeviceIdEmpty(path.to_path_buf())),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_read_device_id_first_line() {
        let path = std::env::temp_dir().join(format!("device_id_{}.txt", std::process::id()));
        fs::write(&path, "  023C3578 \nsecond line\n").unwrap();

        assert_eq!(read_device_id(&path).unwrap(), "023C3578");

        fs::remove_file(&path).ok();
        assert!(matches!(read_device_id(&path), Err(HostError::DeviceIdMissing(_))));
    }
}
