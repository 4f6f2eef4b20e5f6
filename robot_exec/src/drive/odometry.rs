//! # Odometry thread
//!
//! Samples every module and the gyro at a fixed rate, independently of the main tick, and feeds
//! the pose estimator. The estimator's mutex is the only thing shared with the main thread.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, error, info, warn};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};
use util::time::{Clock, PeriodicDriver};

use super::{EstimatorError, ModulePositions, PoseEstimator, SwerveModule, NUM_MODULES};
use crate::hal::Gyro;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of samples the measured frequency is averaged over.
const FREQUENCY_WINDOW: u64 = 50;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The devices read on each odometry sample.
#[derive(Clone)]
pub struct OdometrySource {
    pub modules: [SwerveModule; NUM_MODULES],
    pub gyro: Gyro,
}

/// Counters shared between the odometry thread and the drive.
#[derive(Debug, Default)]
pub struct OdometryStats {
    /// Samples where at least one device could not be read
    failed_reads: AtomicU64,

    /// Measured sample rate, bits of an `f64`
    frequency_hz_bits: AtomicU64,

    /// Set if the estimator reported an unrecoverable fault
    fatal: AtomicBool,
}

/// Handle to the running odometry thread. Stops the thread when dropped.
pub struct OdometryThread {
    bg_jh: Option<JoinHandle<()>>,
    bg_run: Arc<AtomicBool>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl OdometrySource {
    /// Read the gyro and every module. Devices which can't be read give `None`.
    pub fn read(&self) -> (Option<util::geom::Rotation2d>, ModulePositions, bool) {
        let mut all_ok = true;

        let gyro = match self.gyro.yaw() {
            Ok(y) => Some(y),
            Err(_) => {
                all_ok = false;
                None
            }
        };

        let mut positions: ModulePositions = [None; NUM_MODULES];
        for (p, m) in positions.iter_mut().zip(self.modules.iter()) {
            match m.position() {
                Ok(pos) => *p = Some(pos),
                Err(_) => all_ok = false,
            }
        }

        (gyro, positions, all_ok)
    }
}

impl OdometryStats {
    pub fn failed_reads(&self) -> u64 {
        self.failed_reads.load(Ordering::Relaxed)
    }

    /// Units: Hertz
    pub fn frequency_hz(&self) -> f64 {
        f64::from_bits(self.frequency_hz_bits.load(Ordering::Relaxed))
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Relaxed)
    }

    /// Latch the fatal flag, logging the first time.
    pub fn mark_fatal(&self) {
        if !self.fatal.swap(true, Ordering::Relaxed) {
            error!("Pose estimator marked fatal");
        }
    }

    fn set_frequency_hz(&self, hz: f64) {
        self.frequency_hz_bits.store(hz.to_bits(), Ordering::Relaxed);
    }
}

impl OdometryThread {
    /// Start sampling at `rate_hz`.
    pub fn spawn(
        source: OdometrySource,
        estimator: Arc<Mutex<PoseEstimator>>,
        stats: Arc<OdometryStats>,
        clock: &Clock,
        rate_hz: f64,
    ) -> Self {
        let bg_run = Arc::new(AtomicBool::new(true));
        let bg_run_clone = bg_run.clone();
        let clock = clock.clone();

        info!("Starting odometry thread at {} Hz", rate_hz);

        let bg_jh = Some(thread::spawn(move || {
            bg_thread(source, estimator, stats, clock, rate_hz, bg_run_clone)
        }));

        Self { bg_jh, bg_run }
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.bg_run.store(false, Ordering::Relaxed);
        if let Some(jh) = self.bg_jh.take() {
            if jh.join().is_err() {
                error!("Odometry thread panicked");
            }
        }
    }
}

impl Drop for OdometryThread {
    fn drop(&mut self) {
        self.stop();
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Take one odometry sample at the current time and add it to the estimator.
pub fn sample_odometry(
    source: &OdometrySource,
    estimator: &Mutex<PoseEstimator>,
    stats: &OdometryStats,
    clock: &Clock,
) {
    let (gyro, positions, all_ok) = source.read();
    if !all_ok {
        stats.failed_reads.fetch_add(1, Ordering::Relaxed);
    }

    let time_s = clock.now_s();

    let mut est = match estimator.lock() {
        Ok(e) => e,
        Err(_) => {
            if !stats.fatal.swap(true, Ordering::Relaxed) {
                error!("Pose estimator mutex poisoned");
            }
            return;
        }
    };

    match est.update(time_s, gyro, positions) {
        Ok(_) => (),
        Err(e @ EstimatorError::BufferCorrupt(_)) => {
            if !stats.fatal.swap(true, Ordering::Relaxed) {
                error!("Odometry update failed: {}", e);
            }
        }
        Err(e) => debug!("Odometry sample skipped: {}", e),
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn bg_thread(
    source: OdometrySource,
    estimator: Arc<Mutex<PoseEstimator>>,
    stats: Arc<OdometryStats>,
    clock: Clock,
    rate_hz: f64,
    run: Arc<AtomicBool>,
) {
    let mut driver = PeriodicDriver::new(&clock, 1.0 / rate_hz);
    let mut window_start_s = clock.now_s();
    let mut num_periods = 0u64;

    while run.load(Ordering::Relaxed) {
        sample_odometry(&source, &estimator, &stats, &clock);

        if num_periods == FREQUENCY_WINDOW {
            let now_s = clock.now_s();
            if now_s > window_start_s {
                stats.set_frequency_hz(num_periods as f64 / (now_s - window_start_s));
            }
            window_start_s = now_s;
            num_periods = 0;
        }

        if let Some(overrun_s) = driver.wait() {
            warn!("Odometry sample overran by {:.4} s", overrun_s);
        }
        num_periods += 1;
    }

    info!("Odometry thread stopped");
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        drive::{test::test_params, ChassisSpeeds, SwerveDrive, SwerveRequest},
        hal::Hardware,
        input::DriverStation,
    };
    use std::time::Duration;
    use util::geom::Rotation2d;

    const RATE_HZ: f64 = 200.0;

    /// Drive straight ahead with every wheel calibrated to point forward.
    fn driving_forward(clock: &Clock) -> SwerveDrive {
        let hw = Hardware::sim(clock);
        let mut drive = SwerveDrive::new(&hw, test_params(), DriverStation::new(), 0.02);
        drive
            .reset_module_offsets([Rotation2d::default(); NUM_MODULES])
            .unwrap();
        drive.apply_request(SwerveRequest::ApplyRobotSpeeds {
            speeds: ChassisSpeeds::new(1.0, 0.0, 0.0),
            wheel_force_ff_v: None,
        });
        drive
    }

    fn latest_time_s(drive: &SwerveDrive) -> f64 {
        drive.estimator.lock().unwrap().latest_time_s().unwrap()
    }

    /// Poll `cond` until it holds, checking the pose stays finite meanwhile.
    fn wait_until<F: Fn(&SwerveDrive) -> bool>(drive: &SwerveDrive, cond: F) -> bool {
        for _ in 0..5000 {
            assert!(drive.pose().is_finite(), "{:?}", drive.pose());
            if cond(drive) {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_thread_samples_at_rate() {
        let clock = Clock::manual();
        let mut drive = driving_forward(&clock);
        drive.start_odometry(RATE_HZ);
        assert!(drive.is_odometry_running());

        // A manual clock is stepped by the thread, one period per sample
        assert!(wait_until(&drive, |d| latest_time_s(d) > 2.0));
        assert!(wait_until(&drive, |d| d.odometry_stats().frequency_hz() > 0.0));
        assert!((drive.odometry_stats().frequency_hz() - RATE_HZ).abs() < 1e-3);

        // The buffer holds one horizon of samples
        let num_samples = drive.estimator.lock().unwrap().num_samples() as f64;
        assert!((num_samples - (1.5 * RATE_HZ + 1.0)).abs() <= 1.0, "{}", num_samples);

        let pose = drive.pose();
        assert!(pose.x_m > 1.0, "{:?}", pose);
        assert!(pose.y_m.abs() < 1e-6);
        assert_eq!(drive.odometry_stats().failed_reads(), 0);
        assert!(!drive.is_fatal());

        drive.stop_odometry();
    }

    #[test]
    fn test_offsets_apply_to_next_sample() {
        let clock = Clock::manual();
        let mut drive = driving_forward(&clock);
        drive.start_odometry(RATE_HZ);
        assert!(wait_until(&drive, |d| latest_time_s(d) > 0.1));

        let mut offsets = drive.module_offsets_deg();
        for o in offsets.iter_mut() {
            *o += 30.0;
        }
        drive.set_module_offsets(offsets);
        let set_s = clock.now_s();

        assert!(wait_until(&drive, |d| latest_time_s(d) > set_s));
        let positions = drive
            .estimator
            .lock()
            .unwrap()
            .latest_positions()
            .unwrap();
        for p in positions.iter() {
            let p = p.unwrap();
            assert!((p.angle - Rotation2d::from_degrees(30.0)).degrees().abs() < 1e-6);
        }

        drive.stop_odometry();
    }

    #[test]
    fn test_stop_joins_thread() {
        let clock = Clock::manual();
        let mut drive = driving_forward(&clock);
        drive.start_odometry(RATE_HZ);
        assert!(wait_until(&drive, |d| latest_time_s(d) > 0.1));

        drive.stop_odometry();
        assert!(!drive.is_odometry_running());

        // Nothing samples once stopped
        let stopped_s = latest_time_s(&drive);
        let stopped_clock_s = clock.now_s();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(latest_time_s(&drive), stopped_s);
        assert_eq!(clock.now_s(), stopped_clock_s);
        assert!(drive.pose().is_finite());

        // And it can be restarted
        drive.start_odometry(RATE_HZ);
        assert!(wait_until(&drive, |d| latest_time_s(d) > stopped_s));
        drive.stop_odometry();
    }
}
