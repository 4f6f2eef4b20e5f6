//! # Hardware abstraction layer
//!
//! Opaque handles for the robot's actuators and sensors. Devices are created through a
//! [`Hardware`] registry which decides the backend: simulated devices integrate their state from
//! the commanded outputs, absent devices report [`HalError::Disconnected`] on every access.
//!
//! No vendor protocol lives here, a real backend would be a third variant of each device's IO
//! enum.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod motor;
mod sensors;

pub use motor::{ControlRequest, Motor, MotorConfig, SlotGains};
pub use sensors::{AbsoluteEncoder, Debouncer, DigitalInput, Gyro};

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use std::sync::Mutex;
use thiserror::Error;
use util::time::Clock;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Battery voltage assumed by the simulation and used to scale feedforwards when no measurement
/// is available.
///
/// Units: volts
pub const NOMINAL_BATTERY_V: f64 = 12.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Registry of every device on the robot.
///
/// Keeps a handle to each motor so they can all be stopped when the robot is made safe.
pub struct Hardware {
    clock: Clock,
    backend: Backend,
    motors: Mutex<Vec<Motor>>,
}

/// The robot's battery.
#[derive(Clone)]
pub struct Battery {
    backend: Backend,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HalError {
    #[error("Device {0} is not connected")]
    Disconnected(String),

    #[error("Device {0} state is poisoned (a thread panicked while holding it)")]
    Poisoned(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Backend {
    Sim,
    Absent,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Hardware {
    /// A registry creating simulated devices driven by the given clock.
    pub fn sim(clock: &Clock) -> Self {
        info!("Hardware backend: simulation");
        Self::with_backend(clock, Backend::Sim)
    }

    /// A registry for a robot with no supported device backend. Every device reports
    /// disconnected.
    pub fn absent(clock: &Clock) -> Self {
        warn!("Hardware backend: none, all devices will report disconnected");
        Self::with_backend(clock, Backend::Absent)
    }

    fn with_backend(clock: &Clock, backend: Backend) -> Self {
        Self {
            clock: clock.clone(),
            backend,
            motors: Mutex::new(Vec::new()),
        }
    }

    pub fn is_sim(&self) -> bool {
        self.backend == Backend::Sim
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn motor(&self, name: &str, config: MotorConfig) -> Motor {
        let motor = match self.backend {
            Backend::Sim => Motor::sim(name, config, &self.clock),
            Backend::Absent => Motor::absent(name, config),
        };

        if let Ok(mut motors) = self.motors.lock() {
            motors.push(motor.clone());
        }

        motor
    }

    /// An absolute encoder. In simulation it follows the position of `follow` (typically the
    /// steer motor it is mounted with), offset by the magnet mounting angle.
    pub fn absolute_encoder(
        &self,
        name: &str,
        follow: Option<&Motor>,
        sim_mount_deg: f64,
    ) -> AbsoluteEncoder {
        match self.backend {
            Backend::Sim => AbsoluteEncoder::sim(name, follow, sim_mount_deg),
            Backend::Absent => AbsoluteEncoder::absent(name),
        }
    }

    pub fn gyro(&self, name: &str) -> Gyro {
        match self.backend {
            Backend::Sim => Gyro::sim(name, &self.clock),
            Backend::Absent => Gyro::absent(name),
        }
    }

    pub fn digital_input(&self, name: &str, sim_initial: bool) -> DigitalInput {
        match self.backend {
            Backend::Sim => DigitalInput::sim(name, sim_initial),
            Backend::Absent => DigitalInput::absent(name),
        }
    }

    pub fn battery(&self) -> Battery {
        Battery {
            backend: self.backend,
        }
    }

    /// Put every registered motor in neutral.
    pub fn stop_all(&self) {
        match self.motors.lock() {
            Ok(motors) => {
                for m in motors.iter() {
                    m.stop();
                }
                debug!("Stopped {} motors", motors.len());
            }
            Err(_) => warn!("Motor registry poisoned, cannot stop motors"),
        }
    }

    pub fn num_motors(&self) -> usize {
        self.motors.lock().map(|m| m.len()).unwrap_or(0)
    }
}

impl Battery {
    /// Battery voltage.
    ///
    /// Units: volts
    pub fn voltage_v(&self) -> Result<f64, HalError> {
        match self.backend {
            Backend::Sim => Ok(NOMINAL_BATTERY_V),
            Backend::Absent => Err(HalError::Disconnected("battery".into())),
        }
    }

    /// Battery voltage, falling back to nominal if it can't be measured.
    pub fn voltage_or_nominal_v(&self) -> f64 {
        self.voltage_v().unwrap_or(NOMINAL_BATTERY_V)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_stop_all() {
        let clock = Clock::manual();
        let hw = Hardware::sim(&clock);
        let a = hw.motor("a", MotorConfig::default());
        let b = hw.motor("b", MotorConfig::default());
        a.set_control(ControlRequest::DutyCycle { output: 0.5 }).unwrap();
        b.set_control(ControlRequest::Voltage { volts: 3.0 }).unwrap();
        assert_eq!(hw.num_motors(), 2);

        hw.stop_all();
        assert_eq!(a.control(), ControlRequest::Neutral);
        assert_eq!(b.control(), ControlRequest::Neutral);
    }

    #[test]
    fn test_absent_devices_disconnected() {
        let clock = Clock::manual();
        let hw = Hardware::absent(&clock);
        assert!(hw.motor("m", MotorConfig::default()).position_rot().is_err());
        assert!(hw.gyro("g").yaw().is_err());
        assert!(hw.digital_input("d", false).get().is_err());
        assert!(hw.absolute_encoder("e", None, 0.0).raw_deg().is_err());
        assert_eq!(hw.battery().voltage_or_nominal_v(), NOMINAL_BATTERY_V);
    }
}
