use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::message_type::MessageType;

/// Packet header: type (1) + length (3) = 4 bytes.
pub const HEADER_SIZE: usize = 4;

/// Largest length representable in the 24-bit header field.
pub const MAX_WIRE_LENGTH: usize = 0x00FF_FFFF;

/// Default maximum payload size: the full 24-bit range (16 MiB - 1).
pub const DEFAULT_MAX_PACKET_SIZE: usize = MAX_WIRE_LENGTH;

/// A typed packet as carried on the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Logical message kind.
    pub message_type: MessageType,
    /// The packet payload.
    pub payload: Bytes,
}

impl Packet {
    /// Create a new packet.
    pub fn new(message_type: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            payload: payload.into(),
        }
    }

    /// The total wire size of this packet (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a packet into the wire format.
///
/// Wire format:
/// ```text
/// ┌───────────┬──────────────────┬────────────────────┐
/// │ Type (1B) │ Length (3B BE)   │ Payload            │
/// │           │ max 0xFFFFFF     │ (Length bytes)     │
/// └───────────┴──────────────────┴────────────────────┘
/// ```
pub fn encode_packet(message_type: MessageType, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_WIRE_LENGTH {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_WIRE_LENGTH,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u8(message_type.as_u8());
    dst.put_uint(payload.len() as u64, 3);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one packet from the front of a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete packet yet.
/// On success, consumes the packet bytes from the buffer.
///
/// A declared length above `max_packet_size` yields `PayloadTooLarge` and
/// leaves the buffer untouched; the caller owns the recovery policy. An
/// unknown type byte yields `UnknownMessageType` after the packet has been
/// skipped, since its length field is still usable.
pub fn decode_packet(src: &mut BytesMut, max_packet_size: usize) -> Result<Option<Packet>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let type_byte = src[0];
    let length = read_length(&src[1..HEADER_SIZE]);

    if length > max_packet_size {
        return Err(FrameError::PayloadTooLarge {
            size: length,
            max: max_packet_size,
        });
    }

    let total = HEADER_SIZE + length;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(length).freeze();

    match MessageType::from_u8(type_byte) {
        Some(message_type) => Ok(Some(Packet {
            message_type,
            payload,
        })),
        None => Err(FrameError::UnknownMessageType {
            byte: type_byte,
            length,
        }),
    }
}

/// Decode every complete packet at the start of `src`.
///
/// Returns the packets and the number of bytes consumed. An incomplete
/// trailing packet is left unconsumed. A corrupt length consumes the whole
/// input; unknown packets are skipped.
pub fn decode_packets(src: &[u8], max_packet_size: usize) -> (Vec<Packet>, usize) {
    let mut buf = BytesMut::from(src);
    let mut packets = Vec::new();
    loop {
        match decode_packet(&mut buf, max_packet_size) {
            Ok(Some(packet)) => packets.push(packet),
            Ok(None) => break,
            Err(FrameError::UnknownMessageType { .. }) => continue,
            Err(_) => {
                buf.clear();
                break;
            }
        }
    }
    (packets, src.len() - buf.len())
}

fn read_length(bytes: &[u8]) -> usize {
    (usize::from(bytes[0]) << 16) | (usize::from(bytes[1]) << 8) | usize::from(bytes[2])
}

/// Configuration for the packet codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB - 1.
    pub max_packet_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
