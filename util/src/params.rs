//! Generic parameters functions
//!
//! Parameter files live in `$ROBOT_SW_ROOT/params`. TOML is used for hand-edited parameters, JSON
//! for generated data such as the field layout.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::de::DeserializeOwned;
use std::fs::read_to_string;
use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// An error that occurs during loading of a parameter file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("The software root environment variable is not set")]
    SwRootNotSet,

    #[error("Cannot load the parameter file {0:?}: {1}")]
    FileLoadError(PathBuf, std::io::Error),

    #[error("Cannot read the parameter file {0:?}: {1}")]
    DeserialiseError(PathBuf, toml::de::Error),

    #[error("Cannot read the JSON parameter file {0:?}: {1}")]
    JsonDeserialiseError(PathBuf, serde_json::Error),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the path of a file in the params directory.
pub fn param_path(param_file_path: &str) -> Result<PathBuf, LoadError> {
    let mut path = crate::host::get_robot_sw_root().map_err(|_| LoadError::SwRootNotSet)?;
    path.push("params");
    path.push(param_file_path);
    Ok(path)
}

/// Load a TOML parameter file
///
/// The file path is relative to the `params` directory
pub fn load<P>(param_file_path: &str) -> Result<P, LoadError>
where
    P: DeserializeOwned,
{
    let path = param_path(param_file_path)?;

    let params_str = read_to_string(&path).map_err(|e| LoadError::FileLoadError(path.clone(), e))?;

    toml::from_str(params_str.as_str()).map_err(|e| LoadError::DeserialiseError(path, e))
}

/// Load a JSON parameter file
///
/// The file path is relative to the `params` directory
pub fn load_json<P>(param_file_path: &str) -> Result<P, LoadError>
where
    P: DeserializeOwned,
{
    let path = param_path(param_file_path)?;

    let params_str = read_to_string(&path).map_err(|e| LoadError::FileLoadError(path.clone(), e))?;

    serde_json::from_str(params_str.as_str()).map_err(|e| LoadError::JsonDeserialiseError(path, e))
}
