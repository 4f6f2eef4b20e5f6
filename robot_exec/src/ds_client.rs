//! # Driver Station Client
//!
//! Subscribes to the driver station's packet stream. Packets are published at the driver
//! station's own rate, the robot only ever acts on the newest one.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    ds::{DsPacket, DsParseError},
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Driver station client
pub struct DsClient {
    socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DsClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("The client is not connected to the driver station")]
    NotConnected,

    #[error("Could not recieve a message from the driver station: {0}")]
    RecvError(zmq::Error),

    #[error("Could not parse the recieved packet: {0}")]
    PacketParseError(DsParseError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DsClient {
    /// Create a new instance of the client.
    ///
    /// This function will not block until the driver station connects.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, DsClientError> {
        let socket = MonitoredSocket::new(
            ctx,
            zmq::SUB,
            SocketOptions::subscriber(""),
            &params.ds_endpoint,
        )
        .map_err(DsClientError::SocketError)?;

        Ok(Self { socket })
    }

    /// Check if the client is connected to the driver station
    pub fn is_connected(&self) -> bool {
        self.socket.connected()
    }

    /// Receive the newest packet, discarding any older ones still queued.
    ///
    /// Returns `Ok(None)` if nothing has arrived since the last call.
    pub fn receive_packet(&self) -> Result<Option<DsPacket>, DsClientError> {
        if !self.socket.connected() {
            return Err(DsClientError::NotConnected);
        }

        match self.socket.recv_latest_string() {
            Ok(Some(s)) => DsPacket::from_json(&s)
                .map(Some)
                .map_err(DsClientError::PacketParseError),
            Ok(None) => Ok(None),
            Err(e) => Err(DsClientError::RecvError(e)),
        }
    }
}
