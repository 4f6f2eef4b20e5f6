//! # Robot chooser
//!
//! Picks which robot this software is running on from the device identity file. Ids are compared
//! case-insensitively; a missing file or an unknown id selects the default variant.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{info, warn};
use std::path::Path;
use util::host::{self, HostError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct RobotChooser {
    variants: Vec<(String, Variant)>,
    default: Variant,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The robots this software can drive.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Variant {
    /// Competition robot
    Ralph,

    /// Drive-only practice base
    Zippy,
}

#[derive(Debug, thiserror::Error)]
pub enum ChooserError {
    #[error("Could not read the device id: {0}")]
    DeviceId(#[from] HostError),

    #[error("No robot is registered for device id {0:?}")]
    UnknownId(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RobotChooser {
    pub fn new(default: Variant) -> Self {
        Self {
            variants: Vec::new(),
            default,
        }
    }

    /// The robots in service.
    pub fn shipped() -> Self {
        Self::new(Variant::Zippy).register("023C3578", Variant::Ralph)
    }

    pub fn register(mut self, device_id: &str, variant: Variant) -> Self {
        self.variants.push((device_id.to_string(), variant));
        self
    }

    pub fn default_variant(&self) -> Variant {
        self.default
    }

    /// The variant registered for `device_id`.
    pub fn lookup(&self, device_id: &str) -> Result<Variant, ChooserError> {
        let id = device_id.trim();
        self.variants
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(id))
            .map(|(_, v)| *v)
            .ok_or_else(|| ChooserError::UnknownId(id.to_string()))
    }

    /// Read the identity file and choose a variant, falling back to the default.
    pub fn choose<P: AsRef<Path>>(&self, device_id_path: P) -> Variant {
        let result = host::read_device_id(device_id_path)
            .map_err(ChooserError::from)
            .and_then(|id| self.lookup(&id));

        match result {
            Ok(v) => {
                info!("Robot variant: {:?}", v);
                v
            }
            Err(e) => {
                warn!("{}, using the default robot {:?}", e, self.default);
                self.default
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn temp_id_file(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("chooser_{}_{}.txt", name, std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_case_insensitive_match() {
        let chooser = RobotChooser::new(Variant::Zippy)
            .register("023c3578", Variant::Ralph)
            .register("deadbeef", Variant::Zippy);

        let path = temp_id_file("match", "023C3578\n");
        assert_eq!(chooser.choose(&path), Variant::Ralph);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_fallback_to_default() {
        let chooser = RobotChooser::shipped();

        let path = temp_id_file("unknown", "0badf00d");
        assert_eq!(chooser.choose(&path), Variant::Zippy);
        assert!(matches!(
            chooser.lookup("0badf00d"),
            Err(ChooserError::UnknownId(_))
        ));
        std::fs::remove_file(&path).ok();

        assert_eq!(chooser.choose(&path), Variant::Zippy);
    }
}
