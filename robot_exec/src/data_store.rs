//! # Data Store
//!
//! Cycle bookkeeping and the safe mode latch for the executable.

use log::{info, warn};

// ---------------------------------------------------------------------------
// ENUMS
// ---------------------------------------------------------------------------

/// Gives the reason the robot has been put into safe mode
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum SafeModeCause {
    /// No driver station packet has been received within the timeout
    DsNotConnected,

    /// The pose estimator hit an unrecoverable fault
    FatalEstimator,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Global data store for the executable.
#[derive(Debug, Default)]
pub struct DataStore {
    // Cycle management
    /// Number of cycles already executed
    pub num_cycles: u64,

    /// True if this cycle falls on a 1Hz boundary
    pub is_1_hz_cycle: bool,

    /// Time at the start of this cycle, seconds on the robot clock
    pub time_s: f64,

    // Safe mode variables
    /// Determines if the robot is in safe mode. While safe the robot behaves as if disabled.
    pub safe: bool,

    /// Gives the reason for the robot being in safe mode.
    pub safe_cause: Option<SafeModeCause>,

    /// Time the last driver station packet was received
    pub last_ds_packet_s: Option<f64>,

    // Monitoring Counters
    /// Number of consecutive cycle overruns
    pub num_consec_cycle_overruns: u64,
}

// ---------------------------------------------------------------------------
// IMPLS
// ---------------------------------------------------------------------------

impl DataStore {
    /// Puts the robot into safe mode with the given cause.
    pub fn make_safe(&mut self, cause: SafeModeCause) {
        if !self.safe {
            warn!("Make safe requested, cause: {:?}", cause);
            self.safe = true;
            self.safe_cause = Some(cause);
        }
    }

    /// Attempts to disable the safe mode by clearing the given cause.
    ///
    /// To remove safe mode the provided cause must match the initial reason for safe mode being
    /// enabled, otherwise the root cause is returned as the error. If safe mode was not enabled
    /// `Ok(())` is returned.
    pub fn make_unsafe(&mut self, cause: SafeModeCause) -> Result<(), SafeModeCause> {
        if !self.safe {
            return Ok(());
        }

        match self.safe_cause {
            Some(root_cause) if root_cause != cause => Err(root_cause),
            _ => {
                self.safe = false;
                self.safe_cause = None;
                info!("Make unsafe requested, root cause match, safe mode disabled");
                Ok(())
            }
        }
    }

    /// Perform actions required at the start of a cycle.
    pub fn cycle_start(&mut self, cycle_frequency_hz: f64, time_s: f64) {
        let cycles_per_second = (cycle_frequency_hz.round() as u64).max(1);
        self.is_1_hz_cycle = self.num_cycles % cycles_per_second == 0;
        self.time_s = time_s;
    }

    /// Perform actions required at the end of a cycle.
    pub fn cycle_end(&mut self) {
        self.num_cycles += 1;
    }

    /// Record that a driver station packet arrived.
    pub fn ds_packet_received(&mut self) {
        self.last_ds_packet_s = Some(self.time_s);
    }

    /// True if a driver station packet has been seen within `timeout_s`.
    pub fn ds_connected(&self, timeout_s: f64) -> bool {
        match self.last_ds_packet_s {
            Some(t) => self.time_s - t <= timeout_s,
            None => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_safe_mode_root_cause() {
        let mut ds = DataStore::default();
        ds.make_safe(SafeModeCause::DsNotConnected);
        ds.make_safe(SafeModeCause::FatalEstimator);

        assert_eq!(
            ds.make_unsafe(SafeModeCause::FatalEstimator),
            Err(SafeModeCause::DsNotConnected)
        );
        assert!(ds.safe);
        assert_eq!(ds.make_unsafe(SafeModeCause::DsNotConnected), Ok(()));
        assert!(!ds.safe);
    }

    #[test]
    fn test_ds_timeout() {
        let mut ds = DataStore::default();
        assert!(!ds.ds_connected(0.5));

        ds.cycle_start(50.0, 1.0);
        ds.ds_packet_received();
        ds.cycle_start(50.0, 1.4);
        assert!(ds.ds_connected(0.5));
        ds.cycle_start(50.0, 1.6);
        assert!(!ds.ds_connected(0.5));
    }
}
