//! # Sensors
//!
//! Absolute encoders, the gyro, digital inputs, and a debouncer for noisy digital signals.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::warn;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, MutexGuard,
};
use util::{geom::Rotation2d, maths::wrap_deg_180, time::Clock};

use super::{motor::Motor, HalError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An absolute steering encoder.
///
/// The reported heading is the raw reading plus a zero offset. The offset is stored atomically so
/// it can be replaced from the main thread while the odometry thread is reading.
#[derive(Clone)]
pub struct AbsoluteEncoder {
    name: String,
    offset_deg_bits: Arc<AtomicU64>,
    io: Arc<Mutex<EncoderIo>>,
    fault_logged: Arc<AtomicBool>,
}

/// A yaw gyro.
#[derive(Clone)]
pub struct Gyro {
    name: String,
    io: Arc<Mutex<GyroIo>>,
    fault_logged: Arc<AtomicBool>,
}

/// A digital input, such as a limit switch or beam break.
#[derive(Clone)]
pub struct DigitalInput {
    name: String,
    io: Arc<Mutex<DigitalIo>>,
}

/// Only lets a change in a boolean through once it has been stable for the debounce time.
#[derive(Debug, Clone)]
pub struct Debouncer {
    debounce_s: f64,
    clock: Clock,
    baseline: bool,
    prev_change_s: f64,
}

struct SimGyro {
    clock: Clock,
    last_update_s: f64,
    yaw_deg: f64,
    rate_degps: f64,
    connected: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

enum EncoderIo {
    /// Follows a motor's position, offset by the magnet mounting angle
    Sim {
        follow: Option<Motor>,
        mount_deg: f64,
        connected: bool,
    },
    Absent,
}

enum GyroIo {
    Sim(SimGyro),
    Absent,
}

enum DigitalIo {
    Sim(bool),
    Absent,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl AbsoluteEncoder {
    pub(super) fn sim(name: &str, follow: Option<&Motor>, mount_deg: f64) -> Self {
        Self::with_io(
            name,
            EncoderIo::Sim {
                follow: follow.cloned(),
                mount_deg,
                connected: true,
            },
        )
    }

    pub(super) fn absent(name: &str) -> Self {
        Self::with_io(name, EncoderIo::Absent)
    }

    fn with_io(name: &str, io: EncoderIo) -> Self {
        Self {
            name: name.to_string(),
            offset_deg_bits: Arc::new(AtomicU64::new(0f64.to_bits())),
            io: Arc::new(Mutex::new(io)),
            fault_logged: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The reading before the offset is applied, in [-180, 180).
    pub fn raw_deg(&self) -> Result<f64, HalError> {
        let io = self
            .io
            .lock()
            .map_err(|_| HalError::Poisoned(self.name.clone()))?;

        match *io {
            EncoderIo::Sim {
                ref follow,
                mount_deg,
                connected: true,
            } => {
                let follow_deg = match follow {
                    Some(m) => m.position_rot()? * 360.0,
                    None => 0.0,
                };
                self.fault_logged.store(false, Ordering::Relaxed);
                Ok(wrap_deg_180(follow_deg + mount_deg))
            }
            _ => {
                if !self.fault_logged.swap(true, Ordering::Relaxed) {
                    warn!("Absolute encoder {} is not connected", self.name);
                }
                Err(HalError::Disconnected(self.name.clone()))
            }
        }
    }

    /// The zero offset, in [-180, 180).
    pub fn offset_deg(&self) -> f64 {
        f64::from_bits(self.offset_deg_bits.load(Ordering::Acquire))
    }

    /// Replace the zero offset. Takes effect on the next read.
    pub fn set_offset_deg(&self, offset_deg: f64) {
        self.offset_deg_bits
            .store(wrap_deg_180(offset_deg).to_bits(), Ordering::Release);
    }

    /// The offset-corrected heading, in [-180, 180).
    pub fn absolute_deg(&self) -> Result<f64, HalError> {
        Ok(wrap_deg_180(self.raw_deg()? + self.offset_deg()))
    }

    pub fn set_sim_mount_deg(&self, deg: f64) {
        if let Ok(mut io) = self.io.lock() {
            if let EncoderIo::Sim { mount_deg, .. } = &mut *io {
                *mount_deg = deg;
            }
        }
    }

    pub fn set_sim_connected(&self, value: bool) {
        if let Ok(mut io) = self.io.lock() {
            if let EncoderIo::Sim { connected, .. } = &mut *io {
                *connected = value;
            }
        }
    }
}

impl Gyro {
    pub(super) fn sim(name: &str, clock: &Clock) -> Self {
        Self::with_io(
            name,
            GyroIo::Sim(SimGyro {
                clock: clock.clone(),
                last_update_s: clock.now_s(),
                yaw_deg: 0.0,
                rate_degps: 0.0,
                connected: true,
            }),
        )
    }

    pub(super) fn absent(name: &str) -> Self {
        Self::with_io(name, GyroIo::Absent)
    }

    fn with_io(name: &str, io: GyroIo) -> Self {
        Self {
            name: name.to_string(),
            io: Arc::new(Mutex::new(io)),
            fault_logged: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Robot yaw, counter-clockwise positive.
    pub fn yaw(&self) -> Result<Rotation2d, HalError> {
        let mut io = self.lock()?;
        match *io {
            GyroIo::Sim(ref mut s) if s.connected => {
                s.update();
                Ok(Rotation2d::from_degrees(s.yaw_deg))
            }
            _ => {
                if !self.fault_logged.swap(true, Ordering::Relaxed) {
                    warn!("Gyro {} is not connected", self.name);
                }
                Err(HalError::Disconnected(self.name.clone()))
            }
        }
    }

    /// Units: degrees/second
    pub fn rate_degps(&self) -> Result<f64, HalError> {
        match *self.lock()? {
            GyroIo::Sim(ref s) if s.connected => Ok(s.rate_degps),
            _ => Err(HalError::Disconnected(self.name.clone())),
        }
    }

    pub fn set_yaw_deg(&self, yaw_deg: f64) -> Result<(), HalError> {
        match *self.lock()? {
            GyroIo::Sim(ref mut s) => {
                s.update();
                s.yaw_deg = yaw_deg;
                Ok(())
            }
            GyroIo::Absent => Err(HalError::Disconnected(self.name.clone())),
        }
    }

    /// Set the simulated yaw rate, integrated until changed.
    pub fn set_sim_rate_degps(&self, rate_degps: f64) {
        if let Ok(mut io) = self.lock() {
            if let GyroIo::Sim(ref mut s) = *io {
                s.update();
                s.rate_degps = rate_degps;
            }
        }
    }

    pub fn set_sim_connected(&self, connected: bool) {
        if let Ok(mut io) = self.lock() {
            if let GyroIo::Sim(ref mut s) = *io {
                s.update();
                s.connected = connected;
            }
        }
        if connected {
            self.fault_logged.store(false, Ordering::Relaxed);
        }
    }

    fn lock(&self) -> Result<MutexGuard<GyroIo>, HalError> {
        self.io
            .lock()
            .map_err(|_| HalError::Poisoned(self.name.clone()))
    }
}

impl SimGyro {
    fn update(&mut self) {
        let now_s = self.clock.now_s();
        let dt = (now_s - self.last_update_s).max(0.0);
        self.last_update_s = now_s;
        self.yaw_deg += self.rate_degps * dt;
    }
}

impl DigitalInput {
    pub(super) fn sim(name: &str, initial: bool) -> Self {
        Self {
            name: name.to_string(),
            io: Arc::new(Mutex::new(DigitalIo::Sim(initial))),
        }
    }

    pub(super) fn absent(name: &str) -> Self {
        Self {
            name: name.to_string(),
            io: Arc::new(Mutex::new(DigitalIo::Absent)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The electrical level of the input.
    pub fn get(&self) -> Result<bool, HalError> {
        match *self
            .io
            .lock()
            .map_err(|_| HalError::Poisoned(self.name.clone()))?
        {
            DigitalIo::Sim(v) => Ok(v),
            DigitalIo::Absent => Err(HalError::Disconnected(self.name.clone())),
        }
    }

    pub fn set_sim(&self, value: bool) {
        if let Ok(mut io) = self.io.lock() {
            if let DigitalIo::Sim(ref mut v) = *io {
                *v = value;
            }
        }
    }
}

impl Debouncer {
    pub fn new(debounce_s: f64, clock: &Clock, initial: bool) -> Self {
        Self {
            debounce_s,
            clock: clock.clone(),
            baseline: initial,
            prev_change_s: clock.now_s(),
        }
    }

    /// Feed in the latest raw value, returning the debounced value.
    pub fn calculate(&mut self, input: bool) -> bool {
        let now_s = self.clock.now_s();

        if input == self.baseline {
            self.prev_change_s = now_s;
        }

        if now_s - self.prev_change_s >= self.debounce_s {
            self.baseline = input;
            self.prev_change_s = now_s;
        }

        self.baseline
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hal::motor::{ControlRequest, MotorConfig};

    #[test]
    fn test_encoder_offset_applied() {
        let enc = AbsoluteEncoder::sim("fl", None, 170.0);
        assert_eq!(enc.raw_deg().unwrap(), 170.0);

        enc.set_offset_deg(20.0);
        assert!((enc.absolute_deg().unwrap() + 170.0).abs() < 1e-9);

        enc.set_offset_deg(190.0);
        assert!((enc.offset_deg() + 170.0).abs() < 1e-9);
    }

    #[test]
    fn test_encoder_follows_motor() {
        let clock = Clock::manual();
        let motor = Motor::sim(
            "steer",
            MotorConfig {
                sim_free_speed_rps: 1.0,
                ..Default::default()
            },
            &clock,
        );
        let enc = AbsoluteEncoder::sim("enc", Some(&motor), 10.0);

        motor
            .set_control(ControlRequest::Position {
                position_rot: 0.25,
                velocity_rps: 0.0,
                feedforward_v: 0.0,
            })
            .unwrap();
        clock.advance(1.0);
        assert!((enc.raw_deg().unwrap() - 100.0).abs() < 1e-9);

        enc.set_sim_connected(false);
        assert!(enc.absolute_deg().is_err());
    }

    #[test]
    fn test_gyro_integrates_rate() {
        let clock = Clock::manual();
        let gyro = Gyro::sim("pigeon", &clock);
        gyro.set_sim_rate_degps(90.0);
        clock.advance(0.5);
        assert!((gyro.yaw().unwrap().degrees() - 45.0).abs() < 1e-9);

        gyro.set_yaw_deg(0.0).unwrap();
        gyro.set_sim_rate_degps(0.0);
        assert!(gyro.yaw().unwrap().degrees().abs() < 1e-9);
    }

    #[test]
    fn test_debouncer() {
        let clock = Clock::manual();
        let mut d = Debouncer::new(0.1, &clock, false);

        assert!(!d.calculate(true));
        clock.advance(0.05);
        assert!(!d.calculate(true));
        clock.advance(0.06);
        assert!(d.calculate(true));

        // A short glitch is ignored
        assert!(d.calculate(false));
        clock.advance(0.02);
        assert!(d.calculate(true));
    }
}
