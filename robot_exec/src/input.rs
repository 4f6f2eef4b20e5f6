//! # Operator input
//!
//! [`DriverStation`] holds the most recent driver station packet and hands out triggers and axis
//! readers over it. Handles are shared, so bindings made at startup always read the latest
//! packet.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::ds::{Alliance, Axis, Button, DsPacket, RobotMode, TunableUpdate};
use std::{cell::RefCell, rc::Rc};
use util::maths::{apply_deadband, square_keep_sign};

use crate::cmd::Trigger;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Axis values with a magnitude at or below this read as zero.
pub const AXIS_DEADBAND: f64 = 0.1;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Shared view of the driver station.
#[derive(Clone, Default)]
pub struct DriverStation {
    state: Rc<RefCell<DsState>>,
}

/// One gamepad on the driver station.
#[derive(Clone)]
pub struct Gamepad {
    ds: DriverStation,
    port: usize,
}

#[derive(Default)]
struct DsState {
    packet: DsPacket,
    connected: bool,
    pending_tunables: Vec<TunableUpdate>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DriverStation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the latest packet. Marks the driver station connected.
    ///
    /// Tunable updates accumulate across packets until [`Self::take_tunable_updates`].
    pub fn update(&self, mut packet: DsPacket) {
        let mut s = self.state.borrow_mut();
        let tunables = std::mem::take(&mut packet.tunables);
        s.pending_tunables.extend(tunables);
        s.packet = packet;
        s.connected = true;
    }

    /// Mark the driver station lost. The robot reads as disabled with released controls until
    /// the next packet.
    pub fn set_disconnected(&self) {
        let mut s = self.state.borrow_mut();
        s.connected = false;
        s.packet = DsPacket::default();
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    /// The requested mode, Disabled while disconnected.
    pub fn mode(&self) -> RobotMode {
        let s = self.state.borrow();
        if s.connected {
            s.packet.mode
        } else {
            RobotMode::Disabled
        }
    }

    pub fn alliance(&self) -> Option<Alliance> {
        self.state.borrow().packet.alliance
    }

    /// Units: seconds
    pub fn match_time_s(&self) -> f64 {
        self.state.borrow().packet.match_time_s
    }

    /// Raw axis value in [-1, 1].
    pub fn axis(&self, port: usize, axis: Axis) -> f64 {
        self.state.borrow().packet.gamepad(port).axis(axis)
    }

    pub fn button(&self, port: usize, button: Button) -> bool {
        self.state.borrow().packet.gamepad(port).button(button)
    }

    pub fn dashboard_button(&self, name: &str) -> bool {
        self.state.borrow().packet.dashboard_button(name)
    }

    /// Take every tunable update received since the last call, oldest first.
    pub fn take_tunable_updates(&self) -> Vec<TunableUpdate> {
        std::mem::take(&mut self.state.borrow_mut().pending_tunables)
    }

    pub fn gamepad(&self, port: usize) -> Gamepad {
        Gamepad {
            ds: self.clone(),
            port,
        }
    }

    /// A trigger on a dashboard button.
    pub fn dashboard_trigger(&self, name: &str) -> Trigger {
        let ds = self.clone();
        let name = name.to_string();
        Trigger::new(move || ds.dashboard_button(&name))
    }
}

impl Gamepad {
    pub fn button(&self, button: Button) -> Trigger {
        let (ds, port) = (self.ds.clone(), self.port);
        Trigger::new(move || ds.button(port, button))
    }

    /// Deadbanded and squared axis value, see [`preprocess_axis`].
    pub fn axis(&self, axis: Axis) -> f64 {
        preprocess_axis(self.ds.axis(self.port, axis))
    }

    /// A reader for the preprocessed axis which can be moved into a command.
    pub fn axis_reader(&self, axis: Axis) -> impl Fn() -> f64 + 'static {
        let pad = self.clone();
        move || pad.axis(axis)
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Joystick shaping: zero inside the deadband, otherwise squared keeping the sign.
pub fn preprocess_axis(x: f64) -> f64 {
    square_keep_sign(apply_deadband(x, AXIS_DEADBAND))
}

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::ds::{GamepadState, DRIVER_PORT, OPERATOR_PORT};

    #[test]
    fn test_axis_mapping() {
        assert_eq!(preprocess_axis(0.05), 0.0);
        assert_eq!(preprocess_axis(0.5), 0.25);
        assert_eq!(preprocess_axis(-0.5), -0.25);
        assert_eq!(preprocess_axis(1.0), 1.0);
        assert_eq!(preprocess_axis(0.1), 0.0);
        assert_eq!(preprocess_axis(-0.1), 0.0);
    }

    #[test]
    fn test_axis_mapping_monotone_and_odd() {
        let xs: Vec<f64> = (-100..=100).map(|i| i as f64 / 100.0).collect();
        for w in xs.windows(2) {
            assert!(preprocess_axis(w[0]) <= preprocess_axis(w[1]));
        }
        for x in xs.iter() {
            assert_eq!(preprocess_axis(-x), -preprocess_axis(*x));
        }
    }

    #[test]
    fn test_triggers_follow_latest_packet() {
        let ds = DriverStation::new();
        let a = ds.gamepad(OPERATOR_PORT).button(Button::A);
        let reset = ds.dashboard_trigger("Reset Swerve Modules");
        assert!(!a.get());
        assert_eq!(ds.mode(), RobotMode::Disabled);

        let mut operator = GamepadState::default();
        operator.set_button(Button::A, true);
        let mut driver = GamepadState::default();
        driver.set_axis(Axis::LeftY, -0.5);

        let mut packet = DsPacket {
            mode: RobotMode::Teleop,
            gamepads: vec![driver, operator],
            ..Default::default()
        };
        packet.dashboard.insert("Reset Swerve Modules".into(), true);
        ds.update(packet);

        assert!(a.get());
        assert!(reset.get());
        assert_eq!(ds.gamepad(DRIVER_PORT).axis(Axis::LeftY), -0.25);
        assert_eq!(ds.mode(), RobotMode::Teleop);

        ds.set_disconnected();
        assert!(!a.get());
        assert_eq!(ds.mode(), RobotMode::Disabled);
    }

    #[test]
    fn test_tunable_updates_accumulate_across_packets() {
        use comms_if::tm::TmValue;

        let ds = DriverStation::new();
        let update = |key: &str, v: f64| TunableUpdate {
            key: key.to_string(),
            value: TmValue::Double(v),
        };

        ds.update(DsPacket {
            tunables: vec![update("Drive/TranslationKp", 0.4)],
            ..Default::default()
        });
        ds.update(DsPacket {
            tunables: vec![update("Drive/RotationKp", 0.2)],
            ..Default::default()
        });
        ds.update(DsPacket::default());

        let keys: Vec<String> = ds
            .take_tunable_updates()
            .into_iter()
            .map(|u| u.key)
            .collect();
        assert_eq!(keys, vec!["Drive/TranslationKp", "Drive/RotationKp"]);
        assert!(ds.take_tunable_updates().is_empty());
    }
}
