//! Room client.
//!
//! [`RoomClient`] runs the control handshake against a server, then talks to
//! the room over its own UDP socket.

use bytes::Bytes;
use rendezvous_protocol::{ControlPacket, DataPacket, FrameCodec, Operation, ProtocolError, Status};
use rendezvous_transport::{DatagramSink, FramedStream, TransportError, UdpChannel};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with a failure.
    #[error("Server refused: {0}")]
    Refused(String),

    /// The server answered with an operation out of sequence.
    #[error("Unexpected reply: {0:?}")]
    UnexpectedReply(Operation),

    /// The control connection closed before the handshake finished.
    #[error("Control connection closed during handshake")]
    Closed,

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport error.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Something received on the data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A message relayed from another member.
    Message {
        room: String,
        sender: String,
        text: String,
    },
    /// An error reported by the server.
    Error(String),
}

/// A member of one room.
pub struct RoomClient {
    room: String,
    token: String,
    server: SocketAddr,
    channel: UdpChannel,
    codec: FrameCodec,
}

impl RoomClient {
    /// Create or join `room` as `identity`.
    ///
    /// Runs the handshake on `control`, binds a local UDP socket and
    /// registers it with the server at `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the server refuses the request or either channel
    /// fails.
    pub async fn connect(
        control: SocketAddr,
        data: SocketAddr,
        room: &str,
        identity: &str,
        codec: FrameCodec,
    ) -> Result<Self, ClientError> {
        let mut stream = FramedStream::connect(control, codec.frame_size()).await?;
        let request = codec.try_encode_control(&ControlPacket::request(room, identity))?;
        stream.write_frame(&request).await?;

        let ack = read_control(&mut stream, &codec).await?;
        match (ack.operation, ack.status) {
            (Operation::Ack, Status::Success) => {}
            (Operation::Ack, Status::Failed) => {
                return Err(ClientError::Refused(ack.payload_text().into_owned()))
            }
            (op, _) => return Err(ClientError::UnexpectedReply(op)),
        }

        let reply = read_control(&mut stream, &codec).await?;
        if reply.operation != Operation::Token {
            return Err(ClientError::UnexpectedReply(reply.operation));
        }
        if !reply.is_success() {
            return Err(ClientError::Refused(reply.payload_text().into_owned()));
        }
        let token = std::str::from_utf8(&reply.payload)
            .map_err(|_| ProtocolError::InvalidUtf8("token"))?
            .to_string();
        // Best effort; the server closes its side anyway.
        let _ = stream.close().await;

        let local = match data.ip() {
            IpAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            IpAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let channel = UdpChannel::bind(local, codec.frame_size()).await?;

        let client = Self {
            room: reply.room,
            token,
            server: data,
            channel,
            codec,
        };
        client.register().await?;
        debug!(room = %client.room, token = %client.token, "Joined room");
        Ok(client)
    }

    /// Room this client belongs to.
    #[must_use]
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Membership token issued by the server.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Local address of the data socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.channel.local_addr()?)
    }

    /// Tell the server where to reach this client, refreshing liveness.
    ///
    /// # Errors
    ///
    /// Returns an error if the datagram cannot be sent.
    pub async fn register(&self) -> Result<(), ClientError> {
        self.send_bytes(Bytes::new()).await
    }

    /// Send a message to the room.
    ///
    /// # Errors
    ///
    /// Returns an error if the message does not fit a frame or cannot be
    /// sent.
    pub async fn send(&self, text: &str) -> Result<(), ClientError> {
        self.send_bytes(Bytes::copy_from_slice(text.as_bytes())).await
    }

    async fn send_bytes(&self, message: Bytes) -> Result<(), ClientError> {
        let packet = DataPacket::new(self.room.as_str(), self.token.as_str(), message);
        let frame = self.codec.try_encode_data(&packet)?;
        self.channel.send_to(frame, self.server).await?;
        Ok(())
    }

    /// Wait for the next message or error from the server.
    ///
    /// Datagrams from other addresses and frames that do not decode are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket fails.
    pub async fn recv(&self) -> Result<Incoming, ClientError> {
        loop {
            let (frame, from) = self.channel.recv().await?;
            if from != self.server {
                continue;
            }

            if is_error_frame(&frame) {
                if let Ok(packet) = self.codec.decode_control(&frame) {
                    return Ok(Incoming::Error(packet.payload_text().into_owned()));
                }
                continue;
            }

            match self.codec.decode_data(&frame) {
                Ok(packet) => {
                    return Ok(Incoming::Message {
                        text: packet.text().into_owned(),
                        room: packet.room,
                        sender: packet.token,
                    })
                }
                Err(e) => debug!(error = %e, "Skipping undecodable datagram"),
            }
        }
    }
}

async fn read_control(
    stream: &mut FramedStream<TcpStream>,
    codec: &FrameCodec,
) -> Result<ControlPacket, ClientError> {
    let frame = stream.read_frame().await?.ok_or(ClientError::Closed)?;
    Ok(codec.decode_control(&frame)?)
}

/// Error packets are `ACK`/`FAILED` control frames. A data frame with the
/// same two bytes would need a room name starting with a control character,
/// which the server never accepts.
fn is_error_frame(frame: &[u8]) -> bool {
    frame.len() > 2
        && frame[1] == u8::from(Operation::Ack)
        && frame[2] == u8::from(Status::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_frame_detection() {
        let codec = FrameCodec::default();
        assert!(is_error_frame(&codec.encode_error("lobby", "nope")));
        assert!(is_error_frame(&codec.encode_error("", "nope")));

        let data = codec
            .try_encode_data(&DataPacket::new("lobby", "a", b"hi".to_vec()))
            .unwrap();
        assert!(!is_error_frame(&data));
    }
}
