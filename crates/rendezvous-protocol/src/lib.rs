//! # rendezvous-protocol
//!
//! Wire protocol definitions for the Rendezvous room relay.
//!
//! Clients talk to the server over two channels: a stream channel carrying
//! [`ControlPacket`]s for the create/join handshake, and a datagram channel
//! carrying [`DataPacket`]s once a membership token has been issued. Both
//! use one fixed-size, zero-padded frame per packet.
//!
//! ## Example
//!
//! ```rust
//! use rendezvous_protocol::{codec, ControlPacket, Operation};
//!
//! let frame = codec::encode_control(&ControlPacket::request("lobby", "alice"));
//! let packet = codec::decode_control(&frame).unwrap();
//! assert_eq!(packet.operation, Operation::Request);
//! assert_eq!(packet.room, "lobby");
//! ```

pub mod codec;
pub mod packets;

pub use codec::{FrameCodec, ProtocolError, DEFAULT_FRAME_SIZE, MAX_FIELD_LENGTH};
pub use packets::{ControlPacket, DataPacket, Operation, Status};
