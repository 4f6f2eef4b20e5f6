//! # Motors
//!
//! An opaque motor controller handle supporting duty cycle, voltage, velocity and position
//! control, a stator current limit and soft limits. Positions and velocities are in mechanism
//! rotations; any gearing is handled by the controller.
//!
//! Handles are cheap to clone and may be shared with the odometry thread.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::warn;
use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard};
use util::time::Clock;

use super::{HalError, NOMINAL_BATTERY_V};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Simulated stator current at full output.
const SIM_FULL_OUTPUT_CURRENT_A: f64 = 60.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Closed loop gains held by the motor controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct SlotGains {
    #[serde(default)]
    pub kp: f64,
    #[serde(default)]
    pub ki: f64,
    #[serde(default)]
    pub kd: f64,

    /// Static friction feedforward, volts
    #[serde(default)]
    pub ks: f64,

    /// Velocity feedforward, volts per rotation per second
    #[serde(default)]
    pub kv: f64,

    /// Acceleration feedforward, volts per rotation per second squared
    #[serde(default)]
    pub ka: f64,
}

/// Motor controller configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MotorConfig {
    #[serde(default)]
    pub inverted: bool,

    /// Brake rather than coast when neutral
    #[serde(default)]
    pub brake: bool,

    /// Stator current limit.
    ///
    /// Units: amps
    #[serde(default)]
    pub stator_limit_a: Option<f64>,

    #[serde(default)]
    pub gains: SlotGains,

    /// Units: mechanism rotations
    #[serde(default)]
    pub forward_soft_limit_rot: Option<f64>,

    /// Units: mechanism rotations
    #[serde(default)]
    pub reverse_soft_limit_rot: Option<f64>,

    /// Speed of the mechanism at full output, used by the simulation.
    ///
    /// Units: rotations/second
    #[serde(default = "default_sim_free_speed")]
    pub sim_free_speed_rps: f64,
}

/// A handle to a motor controller.
#[derive(Clone)]
pub struct Motor {
    name: String,
    inner: Arc<Mutex<MotorInner>>,
}

struct MotorInner {
    config: MotorConfig,
    request: ControlRequest,
    reverse_limit_enabled: bool,
    io: MotorIo,
    fault_logged: bool,
}

struct SimMotor {
    clock: Clock,
    last_update_s: f64,
    position_rot: f64,
    velocity_rps: f64,
    applied_v: f64,
    connected: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// What the motor controller is asked to do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlRequest {
    /// No output, brake or coast according to the config
    Neutral,

    /// Fraction of the supply voltage in [-1, 1]
    DutyCycle { output: f64 },

    Voltage { volts: f64 },

    Velocity {
        velocity_rps: f64,
        feedforward_v: f64,
    },

    /// Closed loop position, with the profiled velocity and an arbitrary feedforward
    Position {
        position_rot: f64,
        velocity_rps: f64,
        feedforward_v: f64,
    },
}

enum MotorIo {
    Sim(SimMotor),
    Absent,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            inverted: false,
            brake: false,
            stator_limit_a: None,
            gains: SlotGains::default(),
            forward_soft_limit_rot: None,
            reverse_soft_limit_rot: None,
            sim_free_speed_rps: default_sim_free_speed(),
        }
    }
}

impl Motor {
    pub(super) fn sim(name: &str, config: MotorConfig, clock: &Clock) -> Self {
        let io = MotorIo::Sim(SimMotor {
            clock: clock.clone(),
            last_update_s: clock.now_s(),
            position_rot: 0.0,
            velocity_rps: 0.0,
            applied_v: 0.0,
            connected: true,
        });
        Self::with_io(name, config, io)
    }

    pub(super) fn absent(name: &str, config: MotorConfig) -> Self {
        Self::with_io(name, config, MotorIo::Absent)
    }

    fn with_io(name: &str, config: MotorConfig, io: MotorIo) -> Self {
        Self {
            name: name.to_string(),
            inner: Arc::new(Mutex::new(MotorInner {
                config,
                request: ControlRequest::Neutral,
                reverse_limit_enabled: true,
                io,
                fault_logged: false,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_control(&self, request: ControlRequest) -> Result<(), HalError> {
        let mut inner = self.lock()?;
        inner.update();
        inner.check_connected(&self.name)?;
        inner.request = request;
        Ok(())
    }

    /// The last accepted control request.
    pub fn control(&self) -> ControlRequest {
        self.lock()
            .map(|i| i.request)
            .unwrap_or(ControlRequest::Neutral)
    }

    /// Put the motor in neutral, ignoring faults.
    pub fn stop(&self) {
        if let Ok(mut inner) = self.lock() {
            inner.update();
            inner.request = ControlRequest::Neutral;
        }
    }

    /// Units: mechanism rotations
    pub fn position_rot(&self) -> Result<f64, HalError> {
        self.read(|s| s.position_rot)
    }

    /// Units: mechanism rotations/second
    pub fn velocity_rps(&self) -> Result<f64, HalError> {
        self.read(|s| s.velocity_rps)
    }

    pub fn applied_voltage_v(&self) -> Result<f64, HalError> {
        self.read(|s| s.applied_v)
    }

    /// Stator current, capped by the configured limit.
    pub fn stator_current_a(&self) -> Result<f64, HalError> {
        let limit = self.lock()?.config.stator_limit_a;
        let current = self.read(|s| s.applied_v.abs() / NOMINAL_BATTERY_V * SIM_FULL_OUTPUT_CURRENT_A)?;
        Ok(match limit {
            Some(l) => current.min(l),
            None => current,
        })
    }

    /// Redefine the current position.
    pub fn set_position(&self, position_rot: f64) -> Result<(), HalError> {
        let mut inner = self.lock()?;
        inner.update();
        inner.check_connected(&self.name)?;
        if let MotorIo::Sim(ref mut s) = inner.io {
            s.position_rot = position_rot;
        }
        Ok(())
    }

    /// Enable or disable the reverse soft limit, if one is configured.
    pub fn set_reverse_soft_limit_enabled(&self, enabled: bool) {
        if let Ok(mut inner) = self.lock() {
            inner.update();
            inner.reverse_limit_enabled = enabled;
        }
    }

    pub fn reverse_soft_limit_enabled(&self) -> bool {
        self.lock().map(|i| i.reverse_limit_enabled).unwrap_or(true)
    }

    pub fn config(&self) -> Option<MotorConfig> {
        self.lock().ok().map(|i| i.config.clone())
    }

    pub fn is_connected(&self) -> bool {
        match self.lock() {
            Ok(i) => matches!(i.io, MotorIo::Sim(SimMotor { connected: true, .. })),
            Err(_) => false,
        }
    }

    /// Simulate the controller dropping off (or rejoining) the bus.
    pub fn set_sim_connected(&self, connected: bool) {
        if let Ok(mut inner) = self.lock() {
            inner.update();
            if let MotorIo::Sim(ref mut s) = inner.io {
                s.connected = connected;
            }
            if connected {
                inner.fault_logged = false;
            }
        }
    }

    fn read<F: Fn(&SimMotor) -> f64>(&self, f: F) -> Result<f64, HalError> {
        let mut inner = self.lock()?;
        inner.update();
        inner.check_connected(&self.name)?;
        match inner.io {
            MotorIo::Sim(ref s) => Ok(f(s)),
            MotorIo::Absent => Err(HalError::Disconnected(self.name.clone())),
        }
    }

    fn lock(&self) -> Result<MutexGuard<MotorInner>, HalError> {
        self.inner
            .lock()
            .map_err(|_| HalError::Poisoned(self.name.clone()))
    }
}

impl MotorInner {
    fn check_connected(&mut self, name: &str) -> Result<(), HalError> {
        let connected = matches!(self.io, MotorIo::Sim(SimMotor { connected: true, .. }));
        if connected {
            return Ok(());
        }

        if !self.fault_logged {
            warn!("Motor {} is not connected", name);
            self.fault_logged = true;
        }
        Err(HalError::Disconnected(name.to_string()))
    }

    /// Integrate the simulated mechanism up to the current time.
    fn update(&mut self) {
        let config = &self.config;
        let request = self.request;
        let reverse_enabled = self.reverse_limit_enabled;

        let sim = match self.io {
            MotorIo::Sim(ref mut s) => s,
            MotorIo::Absent => return,
        };

        let now_s = sim.clock.now_s();
        let dt = (now_s - sim.last_update_s).max(0.0);
        sim.last_update_s = now_s;

        let free = config.sim_free_speed_rps.abs().max(1e-9);
        let to_velocity = |volts: f64| volts / NOMINAL_BATTERY_V * free;

        let mut velocity = match request {
            ControlRequest::Neutral => 0.0,
            ControlRequest::DutyCycle { output } => to_velocity(output.max(-1.0).min(1.0) * NOMINAL_BATTERY_V),
            ControlRequest::Voltage { volts } => {
                to_velocity(volts.max(-NOMINAL_BATTERY_V).min(NOMINAL_BATTERY_V))
            }
            ControlRequest::Velocity { velocity_rps, .. } => velocity_rps.max(-free).min(free),
            ControlRequest::Position { position_rot, .. } => {
                if dt > 0.0 {
                    let step = (position_rot - sim.position_rot).max(-free * dt).min(free * dt);
                    step / dt
                } else {
                    0.0
                }
            }
        };

        if let Some(fwd) = config.forward_soft_limit_rot {
            if sim.position_rot >= fwd && velocity > 0.0 {
                velocity = 0.0;
            }
        }
        if let (Some(rev), true) = (config.reverse_soft_limit_rot, reverse_enabled) {
            if sim.position_rot <= rev && velocity < 0.0 {
                velocity = 0.0;
            }
        }

        let prev = sim.position_rot;
        let mut next = prev + velocity * dt;
        if let Some(fwd) = config.forward_soft_limit_rot {
            if next > fwd && prev <= fwd {
                next = fwd;
            }
        }
        if let (Some(rev), true) = (config.reverse_soft_limit_rot, reverse_enabled) {
            if next < rev && prev >= rev {
                next = rev;
            }
        }
        sim.position_rot = next;

        sim.velocity_rps = velocity;
        sim.applied_v = velocity / free * NOMINAL_BATTERY_V;
    }
}

fn default_sim_free_speed() -> f64 {
    100.0
}

#[cfg(test)]
mod test {
    use super::*;

    fn sim_motor(config: MotorConfig) -> (Motor, Clock) {
        let clock = Clock::manual();
        (Motor::sim("test", config, &clock), clock)
    }

    #[test]
    fn test_duty_cycle_integrates() {
        let (m, clock) = sim_motor(MotorConfig {
            sim_free_speed_rps: 10.0,
            ..Default::default()
        });

        m.set_control(ControlRequest::DutyCycle { output: 0.5 }).unwrap();
        clock.advance(1.0);
        assert!((m.position_rot().unwrap() - 5.0).abs() < 1e-9);
        assert!((m.velocity_rps().unwrap() - 5.0).abs() < 1e-9);
        assert!((m.applied_voltage_v().unwrap() - 6.0).abs() < 1e-9);

        m.stop();
        clock.advance(1.0);
        assert!((m.position_rot().unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_position_control_reaches_target() {
        let (m, clock) = sim_motor(MotorConfig {
            sim_free_speed_rps: 2.0,
            ..Default::default()
        });

        m.set_control(ControlRequest::Position {
            position_rot: 1.0,
            velocity_rps: 0.0,
            feedforward_v: 0.0,
        })
        .unwrap();

        clock.advance(0.25);
        assert!((m.position_rot().unwrap() - 0.5).abs() < 1e-9);
        clock.advance(1.0);
        assert!((m.position_rot().unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_reverse_soft_limit() {
        let (m, clock) = sim_motor(MotorConfig {
            sim_free_speed_rps: 1.0,
            reverse_soft_limit_rot: Some(0.0),
            ..Default::default()
        });

        m.set_control(ControlRequest::DutyCycle { output: -1.0 }).unwrap();
        clock.advance(1.0);
        assert_eq!(m.position_rot().unwrap(), 0.0);

        m.set_reverse_soft_limit_enabled(false);
        clock.advance(0.5);
        assert!((m.position_rot().unwrap() + 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_disconnected_reads_fail() {
        let (m, _clock) = sim_motor(MotorConfig::default());
        m.set_sim_connected(false);
        assert!(matches!(m.position_rot(), Err(HalError::Disconnected(_))));
        assert!(m.set_control(ControlRequest::Voltage { volts: 1.0 }).is_err());
        m.set_sim_connected(true);
        assert!(m.position_rot().is_ok());
    }
}
