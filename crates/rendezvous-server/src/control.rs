//! Control-plane handshake.
//!
//! Each control connection runs one [`ControlSession`]:
//!
//! ```text
//! AwaitRequest ──REQUEST──▶ RespondAck ──▶ RespondToken ──▶ Closed
//!      │                                                      ▲
//!      └──────── decode failure / other operation ────────────┘
//! ```
//!
//! The session issues at most one membership and closes the connection.

use rendezvous_core::{Admission, MemberToken, RegistryError, Role, RoomRegistry};
use rendezvous_protocol::{ControlPacket, FrameCodec, Operation, ProtocolError};
use rendezvous_transport::{FramedStream, TransportError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// Control session errors.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Request frame could not be decoded.
    #[error("Malformed frame: {0}")]
    Malformed(ProtocolError),

    /// Room name or payload does not fit the frame.
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(ProtocolError),

    /// Operation byte is not a known operation.
    #[error("Unknown operation: {0}")]
    UnknownOperation(u8),

    /// A known operation that clients may not send.
    #[error("Unexpected operation: {0:?}")]
    UnexpectedOperation(Operation),

    /// Registry refused the request.
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// Peer closed before sending a request.
    #[error("Connection closed before a request arrived")]
    NoRequest,

    /// Peer did not send a request in time.
    #[error("Timed out waiting for a request")]
    Timeout,

    /// Transport failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl ControlError {
    /// Short label for metrics and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ControlError::Malformed(_) => "malformed_frame",
            ControlError::CapacityExceeded(_) => "capacity_exceeded",
            ControlError::UnknownOperation(_) | ControlError::UnexpectedOperation(_) => {
                "unknown_operation"
            }
            ControlError::Registry(_) => "registry",
            ControlError::NoRequest => "no_request",
            ControlError::Timeout => "timeout",
            ControlError::Transport(_) => "transport",
        }
    }
}

impl From<ProtocolError> for ControlError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnknownOperation(op) => ControlError::UnknownOperation(op),
            ProtocolError::CapacityExceeded { .. } => ControlError::CapacityExceeded(err),
            other => ControlError::Malformed(other),
        }
    }
}

/// A membership issued by a completed handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admitted {
    pub room: String,
    pub identity: String,
    pub token: MemberToken,
    pub role: Role,
}

/// Handshake states.
#[derive(Debug)]
enum ControlState {
    AwaitRequest,
    RespondAck {
        room: String,
        identity: String,
    },
    RespondToken {
        room: String,
        identity: String,
        outcome: Result<Admission, RegistryError>,
    },
    Closed(Result<Admitted, ControlError>),
}

/// One control connection's handshake.
pub struct ControlSession<S> {
    stream: FramedStream<S>,
    registry: Arc<RoomRegistry>,
    codec: FrameCodec,
    request_timeout: Duration,
}

impl<S> ControlSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a session over an accepted stream.
    #[must_use]
    pub fn new(
        stream: FramedStream<S>,
        registry: Arc<RoomRegistry>,
        codec: FrameCodec,
        request_timeout: Duration,
    ) -> Self {
        Self {
            stream,
            registry,
            codec,
            request_timeout,
        }
    }

    /// Drive the handshake to completion and close the connection.
    ///
    /// # Errors
    ///
    /// Returns the reason the handshake did not produce a membership. The
    /// peer has already been told, where the connection allowed it.
    pub async fn run(mut self) -> Result<Admitted, ControlError> {
        let mut state = ControlState::AwaitRequest;

        loop {
            state = match state {
                ControlState::AwaitRequest => self.await_request().await,
                ControlState::RespondAck { room, identity } => {
                    self.respond_ack(room, identity).await
                }
                ControlState::RespondToken {
                    room,
                    identity,
                    outcome,
                } => self.respond_token(room, identity, outcome).await,
                ControlState::Closed(result) => {
                    if let Err(e) = self.stream.close().await {
                        debug!(error = %e, "Control stream close failed");
                    }
                    return result;
                }
            };
        }
    }

    async fn await_request(&mut self) -> ControlState {
        match self.read_request().await {
            Ok((room, identity)) => ControlState::RespondAck { room, identity },
            Err(e) => {
                warn!(error = %e, "Rejecting control request");
                self.send_best_effort(self.codec.encode_error("", &e.to_string()))
                    .await;
                ControlState::Closed(Err(e))
            }
        }
    }

    async fn read_request(&mut self) -> Result<(String, String), ControlError> {
        let frame = tokio::time::timeout(self.request_timeout, self.stream.read_frame())
            .await
            .map_err(|_| ControlError::Timeout)??
            .ok_or(ControlError::NoRequest)?;

        let packet = self.codec.decode_control(&frame)?;
        if packet.operation != Operation::Request {
            return Err(ControlError::UnexpectedOperation(packet.operation));
        }

        let identity = std::str::from_utf8(&packet.payload)
            .map_err(|_| ControlError::Malformed(ProtocolError::InvalidUtf8("identity")))?
            .to_string();

        // The request must fit the frame as encoded by this server.
        self.codec
            .try_encode_control(&ControlPacket::request(packet.room.as_str(), identity.as_str()))?;

        debug!(room = %packet.room, identity = %identity, "Control request");
        Ok((packet.room, identity))
    }

    async fn respond_ack(&mut self, room: String, identity: String) -> ControlState {
        let ack = self.codec.encode_control(&ControlPacket::ack(room.as_str()));
        if let Err(e) = self.stream.write_frame(&ack).await {
            return ControlState::Closed(Err(e.into()));
        }

        let outcome = self.registry.create_or_join(&room, &identity);
        ControlState::RespondToken {
            room,
            identity,
            outcome,
        }
    }

    async fn respond_token(
        &mut self,
        room: String,
        identity: String,
        outcome: Result<Admission, RegistryError>,
    ) -> ControlState {
        let admission = match outcome {
            Ok(admission) => admission,
            Err(e) => {
                debug!(room = %room, error = %e, "Create/join refused");
                let reply = ControlPacket::token_failed(room.as_str(), e.to_string());
                self.send_best_effort(self.codec.encode_control(&reply)).await;
                return ControlState::Closed(Err(e.into()));
            }
        };

        let reply = ControlPacket::token(room.as_str(), admission.token.as_str());
        let frame = match self.codec.try_encode_control(&reply) {
            Ok(frame) => frame,
            Err(e) => {
                self.registry.leave(&room, admission.token.as_str());
                self.send_best_effort(self.codec.encode_error(&room, &e.to_string()))
                    .await;
                return ControlState::Closed(Err(e.into()));
            }
        };

        if let Err(e) = self.stream.write_frame(&frame).await {
            // The client never saw the token; nothing can use this membership.
            self.registry.leave(&room, admission.token.as_str());
            return ControlState::Closed(Err(e.into()));
        }

        debug!(room = %room, token = %admission.token, role = %admission.role, "Issued token");
        ControlState::Closed(Ok(Admitted {
            room,
            identity,
            token: admission.token,
            role: admission.role,
        }))
    }

    async fn send_best_effort(&mut self, frame: bytes::Bytes) {
        if let Err(e) = self.stream.write_frame(&frame).await {
            debug!(error = %e, "Could not deliver control error");
        }
    }
}
