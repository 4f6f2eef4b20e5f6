//! General time utility functions
//!
//! All robot code reads time through a [`Clock`]. On the robot this is a monotonic clock started
//! with the process, in tests it is a manual clock which only moves when told to.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use conquer_once::OnceCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// STATICS
// ---------------------------------------------------------------------------

static PROCESS_EPOCH: OnceCell<Instant> = OnceCell::uninit();

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A source of monotonic time in seconds.
///
/// Clones of a clock share the same time base.
#[derive(Debug, Clone)]
pub enum Clock {
    /// Seconds since the first call to [`Clock::process`]
    Monotonic(Instant),

    /// A clock which only advances when [`Clock::advance`] or [`Clock::set`] is called. Stored as
    /// the bits of an `f64`.
    Manual(Arc<AtomicU64>),
}

/// A stopwatch reading from a [`Clock`].
#[derive(Debug, Clone)]
pub struct Timer {
    clock: Clock,

    /// Time the timer was last started, if running
    start_s: Option<f64>,

    /// Time accumulated over previous runs
    accumulated_s: f64,
}

/// Paces a loop at a fixed period.
///
/// Missed periods are skipped rather than bunched up, and reported as overruns.
#[derive(Debug)]
pub struct PeriodicDriver {
    clock: Clock,
    period_s: f64,
    next_s: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Clock {
    /// The process-wide monotonic clock.
    pub fn process() -> Self {
        Clock::Monotonic(*PROCESS_EPOCH.get_or_init(Instant::now))
    }

    /// A manual clock starting at zero.
    pub fn manual() -> Self {
        Clock::Manual(Arc::new(AtomicU64::new(0f64.to_bits())))
    }

    /// Current time.
    ///
    /// Units: seconds
    pub fn now_s(&self) -> f64 {
        match self {
            Clock::Monotonic(epoch) => epoch.elapsed().as_secs_f64(),
            Clock::Manual(t) => f64::from_bits(t.load(Ordering::Acquire)),
        }
    }

    /// Advance a manual clock. Has no effect on a monotonic clock.
    pub fn advance(&self, dt_s: f64) {
        if let Clock::Manual(t) = self {
            let now = f64::from_bits(t.load(Ordering::Acquire));
            t.store((now + dt_s.max(0.0)).to_bits(), Ordering::Release);
        }
    }

    /// Set a manual clock, times earlier than the current time are ignored to keep the clock
    /// monotonic. Has no effect on a monotonic clock.
    pub fn set(&self, time_s: f64) {
        if let Clock::Manual(t) = self {
            let now = f64::from_bits(t.load(Ordering::Acquire));
            if time_s > now {
                t.store(time_s.to_bits(), Ordering::Release);
            }
        }
    }

    /// True for a manual clock.
    pub fn is_manual(&self) -> bool {
        matches!(self, Clock::Manual(_))
    }
}

impl Timer {
    /// Create a stopped timer.
    pub fn new(clock: &Clock) -> Self {
        Self {
            clock: clock.clone(),
            start_s: None,
            accumulated_s: 0.0,
        }
    }

    /// Create a running timer.
    pub fn started(clock: &Clock) -> Self {
        let mut t = Self::new(clock);
        t.start();
        t
    }

    /// Start the timer if it isn't already running.
    pub fn start(&mut self) {
        if self.start_s.is_none() {
            self.start_s = Some(self.clock.now_s());
        }
    }

    /// Stop the timer, keeping the accumulated time.
    pub fn stop(&mut self) {
        if let Some(s) = self.start_s.take() {
            self.accumulated_s += self.clock.now_s() - s;
        }
    }

    /// Zero the accumulated time, the timer keeps running if it was.
    pub fn reset(&mut self) {
        self.accumulated_s = 0.0;
        if self.start_s.is_some() {
            self.start_s = Some(self.clock.now_s());
        }
    }

    /// Zero and start the timer.
    pub fn restart(&mut self) {
        self.accumulated_s = 0.0;
        self.start_s = Some(self.clock.now_s());
    }

    /// Elapsed time.
    ///
    /// Units: seconds
    pub fn get_s(&self) -> f64 {
        self.accumulated_s
            + match self.start_s {
                Some(s) => self.clock.now_s() - s,
                None => 0.0,
            }
    }

    pub fn has_elapsed(&self, period_s: f64) -> bool {
        self.get_s() >= period_s
    }

    pub fn is_running(&self) -> bool {
        self.start_s.is_some()
    }
}

impl PeriodicDriver {
    /// Create a new driver, the first period starts now.
    pub fn new(clock: &Clock, period_s: f64) -> Self {
        Self {
            clock: clock.clone(),
            period_s,
            next_s: clock.now_s() + period_s,
        }
    }

    pub fn period_s(&self) -> f64 {
        self.period_s
    }

    /// Sleep until the end of the current period.
    ///
    /// Returns the overrun in seconds if the period had already ended. A manual clock is advanced
    /// to the end of the period instead of sleeping.
    pub fn wait(&mut self) -> Option<f64> {
        let now_s = self.clock.now_s();

        if now_s > self.next_s {
            let overrun_s = now_s - self.next_s;
            // Skip the missed periods
            let missed = (overrun_s / self.period_s).floor() + 1.0;
            self.next_s += missed * self.period_s;
            return Some(overrun_s);
        }

        match self.clock {
            Clock::Monotonic(_) => thread::sleep(Duration::from_secs_f64(self.next_s - now_s)),
            Clock::Manual(_) => self.clock.set(self.next_s),
        }
        self.next_s += self.period_s;

        None
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Convert a duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    duration
        .num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}
