//! # Driver station module
//!
//! The driver station sends a [`DsPacket`] every cycle. It carries the requested robot mode, the
//! alliance, the state of the operator gamepads, dashboard buttons and any tunable updates.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// Internal
use crate::tm::TmValue;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Gamepad port used by the driver.
pub const DRIVER_PORT: usize = 0;

/// Gamepad port used by the operator.
pub const OPERATOR_PORT: usize = 1;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A packet sent by the driver station.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DsPacket {
    /// The mode the robot should be in
    #[serde(default)]
    pub mode: RobotMode,

    /// The alliance the robot is playing on, if the driver station knows it
    #[serde(default)]
    pub alliance: Option<Alliance>,

    /// Remaining match time.
    ///
    /// Units: seconds
    #[serde(default)]
    pub match_time_s: f64,

    /// Gamepad states, indexed by port
    #[serde(default)]
    pub gamepads: Vec<GamepadState>,

    /// Dashboard buttons, by name. A button is pressed while its value is true.
    #[serde(default)]
    pub dashboard: BTreeMap<String, bool>,

    /// Updates to tunable values
    #[serde(default)]
    pub tunables: Vec<TunableUpdate>,
}

/// The state of a single gamepad.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GamepadState {
    /// Analog axes in the range [-1, 1], indexed by [`Axis`]
    #[serde(default)]
    pub axes: Vec<f64>,

    /// Buttons, indexed by [`Button`]
    #[serde(default)]
    pub buttons: Vec<bool>,
}

/// A request to change the value of a tunable parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunableUpdate {
    pub key: String,
    pub value: TmValue,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The robot's operating mode.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum RobotMode {
    Disabled,
    Autonomous,
    Teleop,
    Test,
}

/// Alliance colour.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Alliance {
    Red,
    Blue,
}

/// Gamepad axes, the discriminant is the index into [`GamepadState::axes`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum Axis {
    LeftX = 0,
    LeftY = 1,
    RightX = 2,
    RightY = 3,
    LeftTrigger = 4,
    RightTrigger = 5,
}

/// Gamepad buttons, the discriminant is the index into [`GamepadState::buttons`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum Button {
    A = 0,
    B = 1,
    X = 2,
    Y = 3,
    LeftBumper = 4,
    RightBumper = 5,
    Back = 6,
    Start = 7,
    LeftStick = 8,
    RightStick = 9,
}

/// Possible parsing errors.
#[derive(Debug, Error)]
pub enum DsParseError {
    #[error("Packet contains invalid JSON: {0}")]
    InvalidJson(serde_json::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl DsPacket {
    /// Parse a packet from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self, DsParseError> {
        serde_json::from_str(json_str).map_err(DsParseError::InvalidJson)
    }

    /// Serialize the packet into a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Get the gamepad on the given port, or an all-zero gamepad if it isn't connected.
    pub fn gamepad(&self, port: usize) -> GamepadState {
        self.gamepads.get(port).cloned().unwrap_or_default()
    }

    /// Return whether the named dashboard button is pressed.
    pub fn dashboard_button(&self, name: &str) -> bool {
        self.dashboard.get(name).copied().unwrap_or(false)
    }
}

impl GamepadState {
    /// Read an axis, clamped into [-1, 1].
    ///
    /// Missing or non-finite axes read as zero.
    pub fn axis(&self, axis: Axis) -> f64 {
        match self.axes.get(axis as usize) {
            Some(v) if v.is_finite() => v.max(-1.0).min(1.0),
            _ => 0.0,
        }
    }

    /// Read a button, missing buttons are released.
    pub fn button(&self, button: Button) -> bool {
        self.buttons.get(button as usize).copied().unwrap_or(false)
    }

    /// Set an axis value, growing the axis list if required.
    pub fn set_axis(&mut self, axis: Axis, value: f64) {
        let idx = axis as usize;
        if self.axes.len() <= idx {
            self.axes.resize(idx + 1, 0.0);
        }
        self.axes[idx] = value;
    }

    /// Set a button value, growing the button list if required.
    pub fn set_button(&mut self, button: Button, pressed: bool) {
        let idx = button as usize;
        if self.buttons.len() <= idx {
            self.buttons.resize(idx + 1, false);
        }
        self.buttons[idx] = pressed;
    }
}

impl Default for RobotMode {
    fn default() -> Self {
        RobotMode::Disabled
    }
}

impl RobotMode {
    /// True if the mode allows actuators to be driven.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, RobotMode::Disabled)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_minimal_packet() {
        let p = DsPacket::from_json(r#"{"mode": "Teleop"}"#).unwrap();
        assert_eq!(p.mode, RobotMode::Teleop);
        assert!(p.alliance.is_none());
        assert_eq!(p.gamepad(DRIVER_PORT).axis(Axis::LeftX), 0.0);
        assert!(!p.dashboard_button("Reset Swerve Modules"));
    }

    #[test]
    fn test_axis_clamped() {
        let mut g = GamepadState::default();
        g.set_axis(Axis::RightX, 1.7);
        g.set_axis(Axis::LeftY, std::f64::NAN);
        assert_eq!(g.axis(Axis::RightX), 1.0);
        assert_eq!(g.axis(Axis::LeftY), 0.0);

        g.set_button(Button::Back, true);
        assert!(g.button(Button::Back));
        assert!(!g.button(Button::Start));
    }
}
