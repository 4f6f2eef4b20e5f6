//! # Telemetry outputs
//!
//! Backends the telemetry sink fans out to: a CSV archive in the session directory, a ZMQ
//! publisher for live dashboards, and an in-memory store used by tests.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
    tm::{TmEntry, TmPacket, TmValue},
};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use util::{
    archive::{ArchiveError, Archiver},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A destination for telemetry packets.
pub trait TmOutput: Send {
    fn name(&self) -> &str;

    /// Write a packet. Must not block the caller for longer than a few milliseconds.
    fn write(&mut self, packet: &TmPacket) -> Result<(), TmOutputError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Writes every entry as a `time_s,key,value` row.
pub struct CsvOutput {
    archiver: Archiver,
}

/// Publishes each packet as JSON.
pub struct NetOutput {
    socket: MonitoredSocket,
}

/// Keeps every packet in memory.
pub struct MemoryOutput {
    packets: Arc<Mutex<Vec<TmPacket>>>,
}

/// Read side of a [`MemoryOutput`].
#[derive(Clone)]
pub struct MemoryOutputHandle {
    packets: Arc<Mutex<Vec<TmPacket>>>,
}

#[derive(Serialize)]
struct CsvRow<'a> {
    time_s: f64,
    key: &'a str,
    value: String,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TmOutputError {
    #[error("Archive error: {0}")]
    ArchiveError(ArchiveError),

    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not send telemetry: {0}")]
    SendError(zmq::Error),

    #[error("Could not serialize the telemetry: {0}")]
    SerializationError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CsvOutput {
    /// Create the output, writing to `file_name` in the session's archive directory.
    pub fn new(session: &Session, file_name: &str) -> Result<Self, TmOutputError> {
        Ok(Self {
            archiver: Archiver::from_path(session, file_name)
                .map_err(TmOutputError::ArchiveError)?,
        })
    }

    /// Create the output writing to an explicit path.
    pub fn create<P: AsRef<std::path::Path>>(path: P) -> Result<Self, TmOutputError> {
        Ok(Self {
            archiver: Archiver::create(path).map_err(TmOutputError::ArchiveError)?,
        })
    }
}

impl TmOutput for CsvOutput {
    fn name(&self) -> &str {
        "csv"
    }

    fn write(&mut self, packet: &TmPacket) -> Result<(), TmOutputError> {
        for entry in packet.entries.iter() {
            self.archiver
                .serialise(CsvRow {
                    time_s: entry.time_s,
                    key: &entry.key,
                    value: entry.value.to_field_string(),
                })
                .map_err(TmOutputError::ArchiveError)?;
        }

        self.archiver.flush().map_err(TmOutputError::ArchiveError)
    }
}

impl NetOutput {
    /// Create a new instance of the network output.
    ///
    /// This function will not block until a subscriber connects.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, TmOutputError> {
        let socket = MonitoredSocket::new(
            ctx,
            zmq::PUB,
            SocketOptions::publisher(),
            &params.tm_endpoint,
        )
        .map_err(TmOutputError::SocketError)?;

        Ok(Self { socket })
    }
}

impl TmOutput for NetOutput {
    fn name(&self) -> &str {
        "network"
    }

    fn write(&mut self, packet: &TmPacket) -> Result<(), TmOutputError> {
        let packet_string =
            serde_json::to_string(packet).map_err(TmOutputError::SerializationError)?;

        // A full send queue means nobody is listening, which isn't an error for telemetry
        match self.socket.send(&packet_string, zmq::DONTWAIT) {
            Ok(()) | Err(zmq::Error::EAGAIN) => Ok(()),
            Err(e) => Err(TmOutputError::SendError(e)),
        }
    }
}

impl MemoryOutput {
    pub fn new() -> (Self, MemoryOutputHandle) {
        let packets = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                packets: packets.clone(),
            },
            MemoryOutputHandle { packets },
        )
    }
}

impl TmOutput for MemoryOutput {
    fn name(&self) -> &str {
        "memory"
    }

    fn write(&mut self, packet: &TmPacket) -> Result<(), TmOutputError> {
        if let Ok(mut p) = self.packets.lock() {
            p.push(packet.clone());
        }
        Ok(())
    }
}

impl MemoryOutputHandle {
    pub fn num_packets(&self) -> usize {
        self.packets.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// All entries written so far, in order.
    pub fn entries(&self) -> Vec<TmEntry> {
        match self.packets.lock() {
            Ok(p) => p.iter().flat_map(|p| p.entries.iter().cloned()).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// The most recent value written for `key`.
    pub fn latest(&self, key: &str) -> Option<TmValue> {
        self.entries()
            .into_iter()
            .rev()
            .find(|e| e.key == key)
            .map(|e| e.value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_csv_output_rows() {
        let path = std::env::temp_dir().join(format!("tm_csv_{}.csv", std::process::id()));
        let mut out = CsvOutput::create(&path).unwrap();

        out.write(&TmPacket {
            time_s: 1.0,
            entries: vec![
                TmEntry {
                    key: "drive/speed".into(),
                    time_s: 0.5,
                    value: TmValue::Double(2.5),
                },
                TmEntry {
                    key: "manipulator/state".into(),
                    time_s: 0.5,
                    value: TmValue::Str("HUNGRY".into()),
                },
            ],
        })
        .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(
            written,
            "time_s,key,value\n0.5,drive/speed,2.5\n0.5,manipulator/state,HUNGRY\n"
        );
    }
}
