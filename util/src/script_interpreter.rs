//! # Driver station script interpreter module
//!
//! Scripts replace the network driver station for bench runs. Each entry is a timestamp (seconds
//! since the script started) and a JSON [`DsPacket`] terminated by a semicolon:
//!
//! ```text
//! 0.0: {"mode": "Disabled", "alliance": "Blue"};
//! 1.0: {"mode": "Autonomous", "alliance": "Blue"};
//! 16.0: {"mode": "Teleop", "alliance": "Blue"};
//! ```

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use regex::RegexBuilder;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use thiserror::Error;

// Internal
use comms_if::ds::{DsPacket, DsParseError};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A packet which is scripted to be received at a specific time.
struct ScriptedPacket {
    exec_time_s: f64,
    packet: DsPacket,
}

/// A script interpreter.
///
/// After loading a script use [`ScriptInterpreter::get_pending`] each cycle to acquire the
/// packets that are due.
pub struct ScriptInterpreter {
    packets: VecDeque<ScriptedPacket>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Could not find the script at {0}")]
    ScriptNotFound(String),

    #[error("Could not load the script: {0}")]
    ScriptLoadError(std::io::Error),

    #[error("The script is empty (or is so bad it can't be read)")]
    ScriptEmpty,

    #[error("Script contains an invalid timestamp: {0}. Should be a float (like 1.0)")]
    InvalidTimestamp(String),

    #[error("Script contains an invalid packet at {0} s: {1}")]
    InvalidPacket(f64, DsParseError),
}

pub enum PendingPackets {
    None,
    Some(Vec<DsPacket>),
    EndOfScript,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ScriptInterpreter {
    /// Create a new interpreter from the given script path.
    pub fn new<P: AsRef<Path>>(script_path: P) -> Result<Self, ScriptError> {
        let path = script_path.as_ref();

        if !path.exists() {
            return Err(ScriptError::ScriptNotFound(path.display().to_string()));
        }

        let script = fs::read_to_string(path).map_err(ScriptError::ScriptLoadError)?;

        Self::from_script_str(&script)
    }

    /// Create a new interpreter from the contents of a script.
    pub fn from_script_str(script: &str) -> Result<Self, ScriptError> {
        // Go through the script executing __the magic regex__.
        let re = RegexBuilder::new(r"^\s*(\d+(\.\d+)?)\s*:\s*([^;]*);")
            .multi_line(true)
            .build()
            .expect("script regex is valid");

        let mut packets = VecDeque::new();

        for cap in re.captures_iter(script) {
            let exec_time_s: f64 = cap[1]
                .parse()
                .map_err(|e| ScriptError::InvalidTimestamp(format!("{}", e)))?;

            let packet = DsPacket::from_json(&cap[3])
                .map_err(|e| ScriptError::InvalidPacket(exec_time_s, e))?;

            packets.push_back(ScriptedPacket {
                exec_time_s,
                packet,
            });
        }

        if packets.is_empty() {
            return Err(ScriptError::ScriptEmpty);
        }

        Ok(ScriptInterpreter { packets })
    }

    /// Return the packets due at `script_time_s`, in script order.
    pub fn get_pending(&mut self, script_time_s: f64) -> PendingPackets {
        if self.packets.is_empty() {
            return PendingPackets::EndOfScript;
        }

        let mut due = vec![];

        while let Some(p) = self.packets.front() {
            if p.exec_time_s > script_time_s {
                break;
            }
            if let Some(p) = self.packets.pop_front() {
                due.push(p.packet);
            }
        }

        if due.is_empty() {
            PendingPackets::None
        } else {
            PendingPackets::Some(due)
        }
    }

    /// Get the number of packets remaining in the script
    pub fn get_num_packets(&self) -> usize {
        self.packets.len()
    }

    /// Get the length of the script in seconds
    pub fn get_duration(&self) -> f64 {
        self.packets.back().map(|p| p.exec_time_s).unwrap_or(0f64)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::ds::RobotMode;

    const SCRIPT: &str = r#"
        0.0: {"mode": "Disabled", "alliance": "Red"};
        0.5: {"mode": "Autonomous", "alliance": "Red"};
        2.0: {"mode": "Teleop", "alliance": "Red"};
    "#;

    #[test]
    fn test_pending_in_order() {
        let mut si = ScriptInterpreter::from_script_str(SCRIPT).unwrap();
        assert_eq!(si.get_num_packets(), 3);
        assert_eq!(si.get_duration(), 2.0);

        match si.get_pending(0.6) {
            PendingPackets::Some(p) => {
                assert_eq!(p.len(), 2);
                assert_eq!(p[1].mode, RobotMode::Autonomous);
            }
            _ => panic!("expected two packets"),
        }

        assert!(matches!(si.get_pending(1.0), PendingPackets::None));
        assert!(matches!(si.get_pending(2.0), PendingPackets::Some(_)));
        assert!(matches!(si.get_pending(3.0), PendingPackets::EndOfScript));
    }

    #[test]
    fn test_bad_scripts() {
        assert!(matches!(
            ScriptInterpreter::from_script_str("nothing here"),
            Err(ScriptError::ScriptEmpty)
        ));
        assert!(matches!(
            ScriptInterpreter::from_script_str("1.0: {\"mode\": \"Dancing\"};"),
            Err(ScriptError::InvalidPacket(_, _))
        ));
    }
}
