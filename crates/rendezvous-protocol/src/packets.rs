//! Packet types for the Rendezvous protocol.
//!
//! Two packet families exist: control packets travel over the stream
//! transport during the create/join handshake, data packets travel as
//! datagrams once a client holds a membership token.

use bytes::Bytes;
use std::borrow::Cow;

/// Control packet operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operation {
    /// Client asks to create or join a room. Payload is the requester identity.
    Request = 0,
    /// Server reports an outcome. Payload is a diagnostic when failed.
    Ack = 1,
    /// Server returns the issued membership token.
    Token = 2,
}

impl From<Operation> for u8 {
    fn from(op: Operation) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for Operation {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Operation::Request),
            1 => Ok(Operation::Ack),
            2 => Ok(Operation::Token),
            _ => Err("Invalid operation"),
        }
    }
}

/// Outcome carried by a control packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    Success = 0,
    Failed = 1,
}

impl From<Status> for u8 {
    fn from(status: Status) -> u8 {
        status as u8
    }
}

impl TryFrom<u8> for Status {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Status::Success),
            1 => Ok(Status::Failed),
            _ => Err("Invalid status"),
        }
    }
}

/// A control-channel packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    /// Operation code.
    pub operation: Operation,
    /// Outcome of the operation (always `Success` on requests).
    pub status: Status,
    /// Room the packet refers to. May be empty on error packets.
    pub room: String,
    /// Operation-specific payload.
    pub payload: Bytes,
}

impl ControlPacket {
    /// Create a create-or-join request.
    #[must_use]
    pub fn request(room: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            operation: Operation::Request,
            status: Status::Success,
            room: room.into(),
            payload: Bytes::from(identity.into()),
        }
    }

    /// Create a progress acknowledgment.
    #[must_use]
    pub fn ack(room: impl Into<String>) -> Self {
        Self {
            operation: Operation::Ack,
            status: Status::Success,
            room: room.into(),
            payload: Bytes::new(),
        }
    }

    /// Create an error packet (`ACK` with `FAILED` status).
    #[must_use]
    pub fn error(room: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: Operation::Ack,
            status: Status::Failed,
            room: room.into(),
            payload: Bytes::from(message.into()),
        }
    }

    /// Create a successful token issuance packet.
    #[must_use]
    pub fn token(room: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            operation: Operation::Token,
            status: Status::Success,
            room: room.into(),
            payload: Bytes::from(token.into()),
        }
    }

    /// Create a failed token issuance packet carrying a diagnostic.
    #[must_use]
    pub fn token_failed(room: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: Operation::Token,
            status: Status::Failed,
            room: room.into(),
            payload: Bytes::from(message.into()),
        }
    }

    /// Whether this packet reports success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Payload interpreted as text.
    #[must_use]
    pub fn payload_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// A data-channel packet.
///
/// On the way in, `token` is the sender's membership token. On relayed
/// packets the server puts the sender's identity there instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    /// Target room.
    pub room: String,
    /// Membership token (inbound) or sender identity (relayed).
    pub token: String,
    /// Message bytes, possibly followed by zero padding.
    pub message: Bytes,
}

impl DataPacket {
    /// Create a new data packet.
    #[must_use]
    pub fn new(
        room: impl Into<String>,
        token: impl Into<String>,
        message: impl Into<Bytes>,
    ) -> Self {
        Self {
            room: room.into(),
            token: token.into(),
            message: message.into(),
        }
    }

    /// Message bytes with trailing frame padding removed.
    #[must_use]
    pub fn message_bytes(&self) -> &[u8] {
        let end = self
            .message
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        &self.message[..end]
    }

    /// Message as text, without padding.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.message_bytes())
    }

    /// Whether the message carries no content once padding is removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.message_bytes().is_empty()
    }
}
