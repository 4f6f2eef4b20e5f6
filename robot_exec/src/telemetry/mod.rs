//! # Telemetry
//!
//! The process-wide telemetry sink. Values are recorded against hierarchical keys (`drive/pose`,
//! `manipulator/state`) through a [`LogContext`], buffered, and written to every registered
//! [`TmOutput`] once per main tick by [`flush`].
//!
//! The sink is initialised once before the scheduler starts. It may be written from both the main
//! and odometry threads. Writes before initialisation are dropped.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod outputs;

pub use outputs::{CsvOutput, MemoryOutput, MemoryOutputHandle, NetOutput, TmOutput, TmOutputError};

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::tm::{TmEntry, TmPacket, TmStruct, TmValue};
use conquer_once::OnceCell;
use log::warn;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use util::time::Clock;

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

static TELEMETRY: OnceCell<Arc<Mutex<Telemetry>>> = OnceCell::uninit();

/// Maximum number of entries held between flushes, further entries are dropped.
const MAX_PENDING_ENTRIES: usize = 20_000;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A telemetry sink fanning entries out to a set of outputs.
pub struct Telemetry {
    clock: Clock,
    outputs: Vec<Box<dyn TmOutput>>,
    pending: Vec<TmEntry>,
    num_dropped: usize,
}

/// A handle which writes values under a key prefix.
///
/// Contexts write to the process-wide sink unless built with [`LogContext::with_sink`].
#[derive(Clone)]
pub struct LogContext {
    prefix: String,
    sink: Option<Arc<Mutex<Telemetry>>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Telemetry has already been initialised")]
    AlreadyInitialised,
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Something which can write its state into a [`LogContext`].
pub trait Loggable {
    fn log(&self, ctx: &LogContext);
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Telemetry {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            outputs: Vec::new(),
            pending: Vec::new(),
            num_dropped: 0,
        }
    }

    pub fn add_output(&mut self, output: Box<dyn TmOutput>) {
        self.outputs.push(output);
    }

    /// Record a value, stamped with the current time.
    pub fn put(&mut self, key: String, value: TmValue) {
        if self.pending.len() >= MAX_PENDING_ENTRIES {
            self.num_dropped += 1;
            return;
        }

        self.pending.push(TmEntry {
            key,
            time_s: self.clock.now_s(),
            value,
        });
    }

    /// Write all pending entries to the outputs.
    ///
    /// An output which fails is logged and skipped, the entries are not retried.
    pub fn flush(&mut self) {
        if self.num_dropped > 0 {
            warn!(
                "{} telemetry entries dropped since the last flush",
                self.num_dropped
            );
            self.num_dropped = 0;
        }

        if self.pending.is_empty() {
            return;
        }

        let packet = TmPacket {
            time_s: self.clock.now_s(),
            entries: std::mem::take(&mut self.pending),
        };

        for output in self.outputs.iter_mut() {
            if let Err(e) = output.write(&packet) {
                warn!("Telemetry output {} failed: {}", output.name(), e);
            }
        }
    }

    /// Number of entries waiting for the next flush.
    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }
}

impl LogContext {
    /// A context writing to the process-wide sink under the given prefix.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
            sink: None,
        }
    }

    /// A context writing to a specific sink.
    pub fn with_sink(prefix: &str, sink: Arc<Mutex<Telemetry>>) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
            sink: Some(sink),
        }
    }

    /// A context nested under this one.
    pub fn child(&self, name: &str) -> Self {
        Self {
            prefix: self.key(name),
            sink: self.sink.clone(),
        }
    }

    /// The full key for `name` in this context.
    pub fn key(&self, name: &str) -> String {
        let name = name.trim_matches('/');
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }

    pub fn put<V: Into<TmValue>>(&self, name: &str, value: V) {
        let key = self.key(name);
        match self.sink {
            Some(ref sink) => {
                if let Ok(mut t) = sink.lock() {
                    t.put(key, value.into())
                }
            }
            None => put(key, value),
        }
    }

    /// Record a struct in its packed binary form.
    pub fn put_struct<S: TmStruct>(&self, name: &str, value: &S) {
        self.put(name, value.to_tm_value())
    }

    /// Let `item` log itself under `name`.
    pub fn log<L: Loggable + ?Sized>(&self, name: &str, item: &L) {
        item.log(&self.child(name))
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Install the process-wide telemetry sink.
pub fn init(telemetry: Telemetry) -> Result<(), TelemetryError> {
    TELEMETRY
        .try_init_once(|| Arc::new(Mutex::new(telemetry)))
        .map_err(|_| TelemetryError::AlreadyInitialised)
}

/// Record a value in the process-wide sink.
pub fn put<V: Into<TmValue>>(key: String, value: V) {
    if let Some(t) = TELEMETRY.get() {
        if let Ok(mut t) = t.lock() {
            t.put(key, value.into());
        }
    }
}

/// Flush the process-wide sink, called once per main tick.
pub fn flush() {
    if let Some(t) = TELEMETRY.get() {
        match t.lock() {
            Ok(mut t) => t.flush(),
            Err(_) => warn!("Telemetry lock poisoned, cannot flush"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use util::geom::{Pose2d, Rotation2d};

    #[test]
    fn test_context_keys_and_flush() {
        let clock = Clock::manual();
        let (mem, handle) = MemoryOutput::new();
        let mut t = Telemetry::new(clock.clone());
        t.add_output(Box::new(mem));
        let sink = Arc::new(Mutex::new(t));

        let ctx = LogContext::with_sink("/robot/", sink.clone());
        let drive = ctx.child("drive");
        clock.advance(0.5);
        drive.put("speed", 1.25);
        drive.child("modules").child("0").put("angle_deg", 90.0);
        ctx.put_struct("pose", &Pose2d::new(1.0, 2.0, Rotation2d::from_degrees(0.0)));

        assert_eq!(sink.lock().unwrap().num_pending(), 3);
        assert!(handle.entries().is_empty());

        sink.lock().unwrap().flush();

        let entries = handle.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].key, "robot/drive/speed");
        assert_eq!(entries[0].time_s, 0.5);
        assert_eq!(entries[1].key, "robot/drive/modules/0/angle_deg");
        assert_eq!(
            handle.latest("robot/drive/speed").and_then(|v| v.as_f64()),
            Some(1.25)
        );
        match handle.latest("robot/pose") {
            Some(TmValue::Struct { type_name, data }) => {
                assert_eq!(type_name, "Pose2d");
                assert_eq!(data.len(), 24);
            }
            other => panic!("unexpected pose value {:?}", other),
        }
    }

    #[test]
    fn test_flush_without_entries_writes_nothing() {
        let (mem, handle) = MemoryOutput::new();
        let mut t = Telemetry::new(Clock::manual());
        t.add_output(Box::new(mem));
        t.flush();
        assert_eq!(handle.num_packets(), 0);
    }
}
