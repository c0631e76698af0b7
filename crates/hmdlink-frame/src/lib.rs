//! Typed length-prefixed packet framing for the headset perception link.
//!
//! Every packet on the stream is framed with:
//! - A 1-byte message type
//! - A 3-byte big-endian payload length
//!
//! The [`FrameDecoder`] owns the reassembly buffer, so callers feed it raw
//! socket reads and get back complete packets. Eye preview payloads carry a
//! nested multi-image format handled by [`eye_images`].

pub mod codec;
pub mod decoder;
pub mod error;
pub mod eye_images;
pub mod message_type;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_packet, decode_packets, encode_packet, FrameConfig, Packet, DEFAULT_MAX_PACKET_SIZE,
    HEADER_SIZE, MAX_WIRE_LENGTH,
};
pub use decoder::{DecoderStats, FrameDecoder};
pub use error::{FrameError, Result};
pub use eye_images::{
    decode_eye_images, encode_eye_images, try_decode_eye_images, EyeImage, LEFT_EYE,
    MAX_EYE_IMAGE_BYTES, RIGHT_EYE,
};
pub use message_type::MessageType;
pub use reader::FrameReader;
pub use writer::FrameWriter;
