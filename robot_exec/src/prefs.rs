//! # Preferences
//!
//! A persistent key to value store kept as a JSON file. Every write replaces the file atomically
//! (write to a temporary file, then rename) so a power cut can't leave half a file behind.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The preferences store.
#[derive(Debug)]
pub struct Preferences {
    path: PathBuf,
    values: BTreeMap<String, PrefValue>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Bool(bool),
    Double(f64),
    Str(String),
}

#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("Could not read the preferences file {0:?}: {1}")]
    ReadError(PathBuf, std::io::Error),

    #[error("Could not parse the preferences file {0:?}: {1}")]
    ParseError(PathBuf, serde_json::Error),

    #[error("Could not serialize the preferences: {0}")]
    SerializeError(serde_json::Error),

    #[error("Could not write the preferences file {0:?}: {1}")]
    WriteError(PathBuf, std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Preferences {
    /// Load the store from `path`. A missing file gives an empty store.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PrefsError> {
        let path = path.as_ref().to_path_buf();

        let values = if path.exists() {
            let s = fs::read_to_string(&path).map_err(|e| PrefsError::ReadError(path.clone(), e))?;
            serde_json::from_str(&s).map_err(|e| PrefsError::ParseError(path.clone(), e))?
        } else {
            info!("No preferences file at {:?}, starting empty", path);
            BTreeMap::new()
        };

        Ok(Self { path, values })
    }

    /// Get a number, missing or non-numeric keys read as `0.0`.
    pub fn get_f64(&self, key: &str) -> f64 {
        match self.values.get(key) {
            Some(PrefValue::Double(v)) => *v,
            Some(other) => {
                warn!("Preference {} is not a number: {:?}", key, other);
                0.0
            }
            None => 0.0,
        }
    }

    pub fn get_bool(&self, key: &str) -> bool {
        matches!(self.values.get(key), Some(PrefValue::Bool(true)))
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.values.get(key) {
            Some(PrefValue::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn set_f64(&mut self, key: &str, value: f64) -> Result<(), PrefsError> {
        self.set(key, PrefValue::Double(value))
    }

    pub fn set_bool(&mut self, key: &str, value: bool) -> Result<(), PrefsError> {
        self.set(key, PrefValue::Bool(value))
    }

    pub fn set_string(&mut self, key: &str, value: &str) -> Result<(), PrefsError> {
        self.set(key, PrefValue::Str(value.to_string()))
    }

    /// Set a value and persist the whole store.
    pub fn set(&mut self, key: &str, value: PrefValue) -> Result<(), PrefsError> {
        self.values.insert(key.to_string(), value);
        self.write()
    }

    fn write(&self) -> Result<(), PrefsError> {
        let s = serde_json::to_string_pretty(&self.values).map_err(PrefsError::SerializeError)?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, s).map_err(|e| PrefsError::WriteError(tmp_path.clone(), e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| PrefsError::WriteError(self.path.clone(), e))
    }
}
