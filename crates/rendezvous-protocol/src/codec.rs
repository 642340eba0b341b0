//! Codec for encoding and decoding Rendezvous packets.
//!
//! Every packet occupies exactly one fixed-size frame. The layouts are:
//!
//! ```text
//! control: room_len:u8 | operation:u8 | status:u8 | payload_len:u16be | room | payload | 0-padding
//! data:    room_len:u8 | token_len:u8 | room | token | message (rest of frame, 0-padded)
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::packets::{ControlPacket, DataPacket, Operation, Status};

/// Default frame size in bytes.
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// Smallest frame size a codec accepts.
pub const MIN_FRAME_SIZE: usize = 64;

/// Largest frame size a codec accepts (largest IPv4 UDP payload).
pub const MAX_FRAME_SIZE: usize = 65_507;

/// Control packet header size in bytes.
pub const CONTROL_HEADER_SIZE: usize = 5;

/// Data packet header size in bytes.
pub const DATA_HEADER_SIZE: usize = 2;

/// Capacity of the single-byte length fields.
pub const MAX_FIELD_LENGTH: usize = u8::MAX as usize;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Buffer is shorter than the header or the declared lengths.
    #[error("Malformed frame: need {needed} bytes, got {actual}")]
    FrameTooShort { needed: usize, actual: usize },

    /// A field does not fit its length field or the frame.
    #[error("{field} is {len} bytes, capacity is {max}")]
    CapacityExceeded {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// Operation byte is not a known operation.
    #[error("Unknown operation: {0}")]
    UnknownOperation(u8),

    /// Status byte is not a known status.
    #[error("Unknown status: {0}")]
    UnknownStatus(u8),

    /// A text field is not valid UTF-8.
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// Frame size outside the supported range.
    #[error("Frame size {0} outside {MIN_FRAME_SIZE}..={MAX_FRAME_SIZE}")]
    InvalidFrameSize(usize),
}

/// Encode a control packet with the default frame size.
///
/// Capacity violations produce an encoded error packet instead.
#[must_use]
pub fn encode_control(packet: &ControlPacket) -> Bytes {
    FrameCodec::default().encode_control(packet)
}

/// Decode a control packet with the default frame size.
///
/// # Errors
///
/// Returns an error if the frame is short or carries unknown codes.
pub fn decode_control(data: &[u8]) -> Result<ControlPacket, ProtocolError> {
    FrameCodec::default().decode_control(data)
}

/// Encode a data packet with the default frame size.
///
/// # Errors
///
/// Returns an error if the room, token or message does not fit.
pub fn try_encode_data(packet: &DataPacket) -> Result<Bytes, ProtocolError> {
    FrameCodec::default().try_encode_data(packet)
}

/// Decode a data packet with the default frame size.
///
/// # Errors
///
/// Returns an error if the frame is shorter than its declared lengths.
pub fn decode_data(data: &[u8]) -> Result<DataPacket, ProtocolError> {
    FrameCodec::default().decode_data(data)
}

/// Fixed-frame codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
        }
    }
}

impl FrameCodec {
    /// Create a codec for the given frame size.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame size is outside the supported range.
    pub fn new(frame_size: usize) -> Result<Self, ProtocolError> {
        if !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&frame_size) {
            return Err(ProtocolError::InvalidFrameSize(frame_size));
        }
        Ok(Self { frame_size })
    }

    /// Frame size in bytes.
    #[must_use]
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Largest message a data packet can carry for the given room and token.
    #[must_use]
    pub fn max_message_len(&self, room: &str, token: &str) -> usize {
        self.frame_size
            .saturating_sub(DATA_HEADER_SIZE + room.len() + token.len())
    }

    /// Longest room name a control packet can carry in this frame size.
    fn control_room_capacity(&self) -> usize {
        MAX_FIELD_LENGTH.min(self.frame_size - CONTROL_HEADER_SIZE)
    }

    /// Encode a control packet.
    ///
    /// # Errors
    ///
    /// Returns `CapacityExceeded` if the room name or payload does not fit.
    pub fn try_encode_control(&self, packet: &ControlPacket) -> Result<Bytes, ProtocolError> {
        check_field("room name", packet.room.len(), self.control_room_capacity())?;
        let capacity = self.frame_size - CONTROL_HEADER_SIZE - packet.room.len();
        check_field("payload", packet.payload.len(), capacity)?;

        let mut buf = BytesMut::with_capacity(self.frame_size);
        buf.put_u8(packet.room.len() as u8);
        buf.put_u8(packet.operation.into());
        buf.put_u8(packet.status.into());
        buf.put_u16(packet.payload.len() as u16);
        buf.extend_from_slice(packet.room.as_bytes());
        buf.extend_from_slice(&packet.payload);
        buf.resize(self.frame_size, 0);

        Ok(buf.freeze())
    }

    /// Encode a control packet, answering capacity violations with an
    /// encoded error packet.
    #[must_use]
    pub fn encode_control(&self, packet: &ControlPacket) -> Bytes {
        match self.try_encode_control(packet) {
            Ok(frame) => frame,
            Err(e) => self.encode_error(&packet.room, &e.to_string()),
        }
    }

    /// Encode an error packet (`ACK`/`FAILED`).
    ///
    /// The room is dropped if it does not fit and the message is cut to the
    /// space left, so the result is always a well-formed frame.
    #[must_use]
    pub fn encode_error(&self, room: &str, message: &str) -> Bytes {
        let room = if room.len() <= self.control_room_capacity() {
            room
        } else {
            ""
        };
        let capacity = self.frame_size - CONTROL_HEADER_SIZE - room.len();
        let message = truncate_utf8(message, capacity);

        let mut buf = BytesMut::with_capacity(self.frame_size);
        buf.put_u8(room.len() as u8);
        buf.put_u8(Operation::Ack.into());
        buf.put_u8(Status::Failed.into());
        buf.put_u16(message.len() as u16);
        buf.extend_from_slice(room.as_bytes());
        buf.extend_from_slice(message.as_bytes());
        buf.resize(self.frame_size, 0);
        buf.freeze()
    }

    /// Decode a control packet.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is shorter than the header or the
    /// declared lengths, or if the operation or status is unknown.
    pub fn decode_control(&self, data: &[u8]) -> Result<ControlPacket, ProtocolError> {
        let header = data
            .get(..CONTROL_HEADER_SIZE)
            .ok_or(ProtocolError::FrameTooShort {
                needed: CONTROL_HEADER_SIZE,
                actual: data.len(),
            })?;

        let room_len = header[0] as usize;
        let operation =
            Operation::try_from(header[1]).map_err(|_| ProtocolError::UnknownOperation(header[1]))?;
        let status =
            Status::try_from(header[2]).map_err(|_| ProtocolError::UnknownStatus(header[2]))?;
        let payload_len = u16::from_be_bytes([header[3], header[4]]) as usize;

        let room_end = CONTROL_HEADER_SIZE + room_len;
        let payload_end = room_end + payload_len;
        if data.len() < payload_end {
            return Err(ProtocolError::FrameTooShort {
                needed: payload_end,
                actual: data.len(),
            });
        }

        let room = std::str::from_utf8(&data[CONTROL_HEADER_SIZE..room_end])
            .map_err(|_| ProtocolError::InvalidUtf8("room name"))?;

        Ok(ControlPacket {
            operation,
            status,
            room: room.to_string(),
            payload: Bytes::copy_from_slice(&data[room_end..payload_end]),
        })
    }

    /// Encode a data packet.
    ///
    /// # Errors
    ///
    /// Returns `CapacityExceeded` if the room, token or message does not fit.
    pub fn try_encode_data(&self, packet: &DataPacket) -> Result<Bytes, ProtocolError> {
        let header_room = DATA_HEADER_SIZE + packet.room.len();
        check_field(
            "room name",
            packet.room.len(),
            MAX_FIELD_LENGTH.min(self.frame_size - DATA_HEADER_SIZE),
        )?;
        check_field(
            "token",
            packet.token.len(),
            MAX_FIELD_LENGTH.min(self.frame_size - header_room),
        )?;
        check_field(
            "message",
            packet.message.len(),
            self.max_message_len(&packet.room, &packet.token),
        )?;

        let mut buf = BytesMut::with_capacity(self.frame_size);
        buf.put_u8(packet.room.len() as u8);
        buf.put_u8(packet.token.len() as u8);
        buf.extend_from_slice(packet.room.as_bytes());
        buf.extend_from_slice(packet.token.as_bytes());
        buf.extend_from_slice(&packet.message);
        buf.resize(self.frame_size, 0);

        Ok(buf.freeze())
    }

    /// Decode a data packet.
    ///
    /// The message is everything after the token, up to the end of the
    /// buffer, padding included.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is shorter than its declared lengths or
    /// the room or token is not UTF-8.
    pub fn decode_data(&self, data: &[u8]) -> Result<DataPacket, ProtocolError> {
        let header = data
            .get(..DATA_HEADER_SIZE)
            .ok_or(ProtocolError::FrameTooShort {
                needed: DATA_HEADER_SIZE,
                actual: data.len(),
            })?;

        let room_end = DATA_HEADER_SIZE + header[0] as usize;
        let token_end = room_end + header[1] as usize;
        if data.len() < token_end {
            return Err(ProtocolError::FrameTooShort {
                needed: token_end,
                actual: data.len(),
            });
        }

        let room = std::str::from_utf8(&data[DATA_HEADER_SIZE..room_end])
            .map_err(|_| ProtocolError::InvalidUtf8("room name"))?;
        let token = std::str::from_utf8(&data[room_end..token_end])
            .map_err(|_| ProtocolError::InvalidUtf8("token"))?;

        Ok(DataPacket {
            room: room.to_string(),
            token: token.to_string(),
            message: Bytes::copy_from_slice(&data[token_end..]),
        })
    }
}

fn check_field(field: &'static str, len: usize, max: usize) -> Result<(), ProtocolError> {
    if len > max {
        return Err(ProtocolError::CapacityExceeded { field, len, max });
    }
    Ok(())
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_roundtrip() {
        let packet = ControlPacket::token("r", "42");
        let encoded = encode_control(&packet);
        assert_eq!(encoded.len(), DEFAULT_FRAME_SIZE);

        let decoded = decode_control(&encoded).unwrap();
        assert_eq!(decoded.operation, Operation::Token);
        assert_eq!(decoded.status, Status::Success);
        assert_eq!(decoded.room, "r");
        assert_eq!(&decoded.payload[..], b"42");
    }

    #[test]
    fn test_control_layout_is_bit_exact() {
        let encoded = encode_control(&ControlPacket::request("ab", "xyz"));
        assert_eq!(&encoded[..10], &[2, 0, 0, 0, 3, b'a', b'b', b'x', b'y', b'z']);
        assert!(encoded[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_control_payload_keeps_trailing_zeros() {
        // Declared lengths, not delimiters, bound the payload.
        let packet = ControlPacket {
            operation: Operation::Ack,
            status: Status::Failed,
            room: "r".to_string(),
            payload: Bytes::from_static(b"a\0\0"),
        };
        let decoded = decode_control(&encode_control(&packet)).unwrap();
        assert_eq!(&decoded.payload[..], b"a\0\0");
    }

    #[test]
    fn test_decode_short_buffer() {
        assert!(matches!(
            decode_control(&[1, 0]),
            Err(ProtocolError::FrameTooShort { needed: 5, actual: 2 })
        ));

        // Header declares a 4-byte room that is not there.
        assert!(matches!(
            decode_control(&[4, 0, 0, 0, 0, b'a']),
            Err(ProtocolError::FrameTooShort { .. })
        ));

        assert!(matches!(
            decode_data(&[]),
            Err(ProtocolError::FrameTooShort { .. })
        ));
        assert!(matches!(
            decode_data(&[3, 3, b'a']),
            Err(ProtocolError::FrameTooShort { .. })
        ));
    }

    #[test]
    fn test_decode_unknown_codes() {
        assert_eq!(
            decode_control(&[0, 7, 0, 0, 0]),
            Err(ProtocolError::UnknownOperation(7))
        );
        assert_eq!(
            decode_control(&[0, 1, 9, 0, 0]),
            Err(ProtocolError::UnknownStatus(9))
        );
    }

    #[test]
    fn test_oversized_room_becomes_error_packet() {
        let room = "r".repeat(MAX_FIELD_LENGTH + 1);
        let packet = ControlPacket::request(room.clone(), "alice");

        assert!(matches!(
            FrameCodec::default().try_encode_control(&packet),
            Err(ProtocolError::CapacityExceeded { field: "room name", .. })
        ));

        let encoded = encode_control(&packet);
        assert_eq!(encoded.len(), DEFAULT_FRAME_SIZE);
        let decoded = decode_control(&encoded).unwrap();
        assert_eq!(decoded.operation, Operation::Ack);
        assert_eq!(decoded.status, Status::Failed);
        assert!(decoded.room.is_empty());
        assert!(decoded.payload_text().contains("room name"));
    }

    #[test]
    fn test_oversized_payload_becomes_error_packet() {
        let codec = FrameCodec::new(MIN_FRAME_SIZE).unwrap();
        let packet = ControlPacket::token("room", "x".repeat(MIN_FRAME_SIZE));

        let encoded = codec.encode_control(&packet);
        assert_eq!(encoded.len(), MIN_FRAME_SIZE);
        let decoded = codec.decode_control(&encoded).unwrap();
        assert_eq!(decoded.status, Status::Failed);
        assert_eq!(decoded.room, "room");
        assert!(decoded.payload.len() <= MIN_FRAME_SIZE - CONTROL_HEADER_SIZE - 4);
    }

    #[test]
    fn test_data_roundtrip_with_padding() {
        let packet = DataPacket::new("lobby", "tok-1", b"hi".to_vec());
        let encoded = try_encode_data(&packet).unwrap();
        assert_eq!(encoded.len(), DEFAULT_FRAME_SIZE);

        let decoded = decode_data(&encoded).unwrap();
        assert_eq!(decoded.room, "lobby");
        assert_eq!(decoded.token, "tok-1");
        assert_eq!(decoded.message.len(), DEFAULT_FRAME_SIZE - DATA_HEADER_SIZE - 10);
        assert_eq!(decoded.text(), "hi");
    }

    #[test]
    fn test_data_message_too_large() {
        let codec = FrameCodec::new(MIN_FRAME_SIZE).unwrap();
        let packet = DataPacket::new("lobby", "tok", vec![b'x'; MIN_FRAME_SIZE]);

        assert!(matches!(
            codec.try_encode_data(&packet),
            Err(ProtocolError::CapacityExceeded { field: "message", .. })
        ));

    }

    #[test]
    fn test_long_room_in_small_frame() {
        let codec = FrameCodec::new(MIN_FRAME_SIZE).unwrap();
        let room = "r".repeat(200);

        assert!(matches!(
            codec.try_encode_control(&ControlPacket::request(room.as_str(), "a")),
            Err(ProtocolError::CapacityExceeded { field: "room name", max: 59, .. })
        ));

        let fallback = codec.encode_control(&ControlPacket::request(room.as_str(), "a"));
        assert_eq!(fallback.len(), MIN_FRAME_SIZE);
        let decoded = codec.decode_control(&fallback).unwrap();
        assert_eq!(decoded.status, Status::Failed);
        assert!(decoded.room.is_empty());
    }

    #[test]
    fn test_error_packet_drops_room_that_fills_frame() {
        let codec = FrameCodec::new(MIN_FRAME_SIZE).unwrap();

        for len in [59, 60, 62, 255] {
            let room = "r".repeat(len);
            let encoded = codec.encode_error(&room, "invalid room or token");
            assert_eq!(encoded.len(), MIN_FRAME_SIZE);

            let decoded = codec.decode_control(&encoded).unwrap();
            assert_eq!(decoded.status, Status::Failed);
            if len <= MIN_FRAME_SIZE - CONTROL_HEADER_SIZE {
                assert_eq!(decoded.room.len(), len);
                assert!(decoded.payload.is_empty());
            } else {
                assert!(decoded.room.is_empty());
                assert_eq!(decoded.payload_text(), "invalid room or token");
            }
        }
    }

    #[test]
    fn test_data_room_and_token_must_fit_frame() {
        let codec = FrameCodec::new(MIN_FRAME_SIZE).unwrap();
        let packet = DataPacket::new("r".repeat(40), "t".repeat(40), Bytes::new());

        assert!(matches!(
            codec.try_encode_data(&packet),
            Err(ProtocolError::CapacityExceeded { field: "token", max: 22, .. })
        ));

        let fits = DataPacket::new("r".repeat(40), "t".repeat(22), Bytes::new());
        let encoded = codec.try_encode_data(&fits).unwrap();
        assert_eq!(encoded.len(), MIN_FRAME_SIZE);
        let decoded = codec.decode_data(&encoded).unwrap();
        assert_eq!(decoded.token.len(), 22);
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_frame_size_bounds() {
        assert!(FrameCodec::new(MIN_FRAME_SIZE - 1).is_err());
        assert!(FrameCodec::new(MAX_FRAME_SIZE + 1).is_err());
        assert_eq!(FrameCodec::new(1024).unwrap().frame_size(), 1024);
    }

    #[test]
    fn test_truncate_utf8_respects_char_boundary() {
        assert_eq!(truncate_utf8("héllo", 2), "h");
        assert_eq!(truncate_utf8("abc", 5), "abc");
    }
}
