//! # Vision source
//!
//! Collects [`VisionPacket`]s from the coprocessors and hands them out per camera, and carries
//! reference orientations back. On the robot the packets arrive on a ZMQ SUB socket, in
//! simulation and tests they are pushed in directly.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    eqpt::vision::{RobotOrientation, VisionPacket, VisionRefPacket},
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};
use log::{info, warn};
use std::collections::HashMap;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Packets kept per camera before the oldest are dropped.
const MAX_PENDING_PER_CAMERA: usize = 16;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The vision hub.
pub struct VisionHub {
    link: Option<VisionLink>,

    pending: HashMap<String, Vec<VisionPacket>>,

    /// Last reference orientation sent to each camera
    orientations: HashMap<String, RobotOrientation>,

    num_dropped: u64,
}

struct VisionLink {
    /// Packets from the coprocessors
    sub: MonitoredSocket,

    /// Reference orientations to the coprocessors
    ref_pub: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not receive a vision packet: {0}")]
    RecvError(zmq::Error),

    #[error("Could not send a reference orientation: {0}")]
    SendError(zmq::Error),

    #[error("Could not serialize the reference orientation: {0}")]
    SerializationError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl VisionHub {
    /// A hub fed only through [`VisionHub::push`].
    pub fn offline() -> Self {
        Self {
            link: None,
            pending: HashMap::new(),
            orientations: HashMap::new(),
            num_dropped: 0,
        }
    }

    /// A hub fed by the coprocessors over the network.
    pub fn connect(ctx: &zmq::Context, params: &NetParams) -> Result<Self, VisionError> {
        let sub = MonitoredSocket::new(
            ctx,
            zmq::SUB,
            SocketOptions::subscriber(""),
            &params.vision_endpoint,
        )
        .map_err(VisionError::SocketError)?;

        let ref_pub = MonitoredSocket::new(
            ctx,
            zmq::PUB,
            SocketOptions::publisher(),
            &params.vision_ref_endpoint,
        )
        .map_err(VisionError::SocketError)?;

        info!(
            "Vision hub listening on {}, publishing references on {}",
            params.vision_endpoint, params.vision_ref_endpoint
        );

        Ok(Self {
            link: Some(VisionLink { sub, ref_pub }),
            ..Self::offline()
        })
    }

    pub fn is_connected(&self) -> bool {
        match self.link {
            Some(ref l) => l.sub.connected(),
            None => false,
        }
    }

    /// Drain the network socket. Malformed packets are logged and skipped.
    pub fn poll(&mut self) -> Result<(), VisionError> {
        let mut received = Vec::new();

        if let Some(ref link) = self.link {
            loop {
                match link.sub.recv_string(zmq::DONTWAIT) {
                    Ok(Ok(s)) => match serde_json::from_str::<VisionPacket>(&s) {
                        Ok(p) => received.push(p),
                        Err(e) => warn!("Dropping malformed vision packet: {}", e),
                    },
                    Ok(Err(_)) => warn!("Dropping non UTF-8 vision packet"),
                    Err(zmq::Error::EAGAIN) => break,
                    Err(e) => return Err(VisionError::RecvError(e)),
                }
            }
        }

        for p in received {
            self.push(p);
        }

        Ok(())
    }

    /// Queue a packet for its camera.
    pub fn push(&mut self, packet: VisionPacket) {
        let queue = self
            .pending
            .entry(packet.camera().to_string())
            .or_insert_with(Vec::new);

        if queue.len() >= MAX_PENDING_PER_CAMERA {
            queue.remove(0);
            self.num_dropped += 1;
        }
        queue.push(packet);
    }

    /// Take every packet waiting for `camera`, oldest first.
    pub fn take(&mut self, camera: &str) -> Vec<VisionPacket> {
        self.pending.remove(camera).unwrap_or_default()
    }

    /// Send a reference orientation to `camera`.
    pub fn publish_orientation(
        &mut self,
        camera: &str,
        orientation: RobotOrientation,
    ) -> Result<(), VisionError> {
        self.orientations.insert(camera.to_string(), orientation);

        if let Some(ref link) = self.link {
            let packet = VisionRefPacket {
                camera: camera.to_string(),
                orientation,
            };
            let s = serde_json::to_string(&packet).map_err(VisionError::SerializationError)?;

            match link.ref_pub.send(&s, 0) {
                Ok(()) | Err(zmq::Error::EAGAIN) => (),
                Err(e) => return Err(VisionError::SendError(e)),
            }
        }

        Ok(())
    }

    /// The last reference orientation sent to `camera`.
    pub fn last_orientation(&self, camera: &str) -> Option<RobotOrientation> {
        self.orientations.get(camera).copied()
    }

    /// Packets dropped because a camera's queue was full.
    pub fn num_dropped(&self) -> u64 {
        self.num_dropped
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::eqpt::vision::MegaTagEstimate;

    fn packet(camera: &str, timestamp_s: f64) -> VisionPacket {
        VisionPacket::MegaTag {
            camera: camera.to_string(),
            estimate: MegaTagEstimate {
                pose: [1.0, 2.0, 0.0],
                timestamp_s,
                latency_ms: 20.0,
                tag_count: 1,
                avg_tag_dist_m: 2.0,
                tag_ids: vec![7],
            },
        }
    }

    #[test]
    fn test_packets_routed_by_camera() {
        let mut hub = VisionHub::offline();
        hub.poll().unwrap();
        hub.push(packet("a", 1.0));
        hub.push(packet("b", 1.0));
        hub.push(packet("a", 2.0));

        let a = hub.take("a");
        assert_eq!(a.len(), 2);
        assert_eq!(a[0], packet("a", 1.0));
        assert!(hub.take("a").is_empty());
        assert_eq!(hub.take("b").len(), 1);
    }

    #[test]
    fn test_queue_bounded() {
        let mut hub = VisionHub::offline();
        for i in 0..(MAX_PENDING_PER_CAMERA + 3) {
            hub.push(packet("a", i as f64));
        }
        let a = hub.take("a");
        assert_eq!(a.len(), MAX_PENDING_PER_CAMERA);
        assert_eq!(a[0], packet("a", 3.0));
        assert_eq!(hub.num_dropped(), 3);
    }
}
