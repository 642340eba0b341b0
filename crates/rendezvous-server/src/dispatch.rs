//! Data-plane datagram dispatch.
//!
//! Every datagram received on the data channel goes through
//! [`Dispatcher::dispatch`]: it is validated against the registry, refreshes
//! the sender's liveness, and is relayed to every other member of the room
//! whose address is known.

use bytes::Bytes;
use rendezvous_core::{Departure, RoomRegistry};
use rendezvous_protocol::{DataPacket, FrameCodec, ProtocolError};
use rendezvous_transport::DatagramSink;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Diagnostic sent for datagrams naming an unknown room or token.
pub const INVALID_MEMBERSHIP: &str = "invalid room or token";

/// What happened to one datagram.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Undecodable; dropped without a reply.
    Dropped(ProtocolError),
    /// Room or token invalid; the sender was sent an error.
    Rejected,
    /// Empty message; only the sender's address and liveness were updated.
    Registered,
    /// Relay frame would not fit; the sender was sent an error.
    TooLarge,
    /// Relayed to `delivered` peers. Peers whose delivery failed were
    /// removed and are listed in `evicted`.
    Relayed {
        delivered: usize,
        evicted: Vec<Departure>,
    },
}

impl DispatchOutcome {
    /// Short label for metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Dropped(_) => "dropped",
            DispatchOutcome::Rejected => "rejected",
            DispatchOutcome::Registered => "registered",
            DispatchOutcome::TooLarge => "too_large",
            DispatchOutcome::Relayed { .. } => "relayed",
        }
    }
}

/// Relays data packets between room members.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<RoomRegistry>,
    sink: Arc<dyn DatagramSink>,
    codec: FrameCodec,
}

impl Dispatcher {
    /// Create a dispatcher sending through `sink`.
    #[must_use]
    pub fn new(registry: Arc<RoomRegistry>, sink: Arc<dyn DatagramSink>, codec: FrameCodec) -> Self {
        Self {
            registry,
            sink,
            codec,
        }
    }

    /// Handle one datagram from `src`.
    pub async fn dispatch(&self, frame: &[u8], src: SocketAddr) -> DispatchOutcome {
        let packet = match self.codec.decode_data(frame) {
            Ok(packet) => packet,
            Err(e) => {
                trace!(peer = %src, error = %e, "Dropping undecodable datagram");
                return DispatchOutcome::Dropped(e);
            }
        };

        if !self.registry.touch(&packet.room, &packet.token, src) {
            debug!(peer = %src, room = %packet.room, "Datagram with invalid room or token");
            self.reply_error(&packet.room, INVALID_MEMBERSHIP, src).await;
            return DispatchOutcome::Rejected;
        }

        if packet.is_empty() {
            trace!(peer = %src, room = %packet.room, "Registered data address");
            return DispatchOutcome::Registered;
        }

        // Gone between touch and here only if evicted concurrently.
        let Some(sender) = self.registry.identity_of(&packet.room, &packet.token) else {
            return DispatchOutcome::Rejected;
        };

        let relay = DataPacket::new(
            packet.room.as_str(),
            sender,
            Bytes::copy_from_slice(packet.message_bytes()),
        );
        let out = match self.codec.try_encode_data(&relay) {
            Ok(out) => out,
            Err(e) => {
                debug!(peer = %src, room = %packet.room, error = %e, "Relay frame too large");
                self.reply_error(&packet.room, &e.to_string(), src).await;
                return DispatchOutcome::TooLarge;
            }
        };

        self.fan_out(&packet.room, &packet.token, out).await
    }

    async fn fan_out(&self, room: &str, sender: &str, frame: Bytes) -> DispatchOutcome {
        let mut delivered = 0;
        let mut evicted = Vec::new();

        for peer in self.registry.snapshot(room, sender) {
            let Some(addr) = peer.addr else {
                continue;
            };
            match self.sink.send_to(frame.clone(), addr).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        room = %room,
                        token = %peer.token,
                        peer = %addr,
                        error = %e,
                        "Delivery failed, removing member"
                    );
                    if let Some(departure) = self.registry.leave(room, peer.token.as_str()) {
                        let room_closed = departure.room_closed;
                        evicted.push(departure);
                        if room_closed {
                            debug!(room = %room, "Room closed during fan-out");
                            break;
                        }
                    }
                }
            }
        }

        trace!(room = %room, delivered, "Relayed message");
        DispatchOutcome::Relayed { delivered, evicted }
    }

    async fn reply_error(&self, room: &str, message: &str, addr: SocketAddr) {
        let frame = self.codec.encode_error(room, message);
        if let Err(e) = self.sink.send_to(frame, addr).await {
            debug!(peer = %addr, error = %e, "Could not deliver error reply");
        }
    }
}
