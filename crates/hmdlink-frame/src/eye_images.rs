//! Stereo eye-crop sub-protocol carried in `EyePreview` payloads.
//!
//! ```text
//! ┌───────────┬──────────────────────────────────────────────────────────┐
//! │ Count (1B)│ Count x { eye (1B), width (2B), height (2B),             │
//! │           │           length (4B), length bytes of compressed image } │
//! └───────────┴──────────────────────────────────────────────────────────┘
//! ```
//!
//! All multi-byte fields are little-endian on both peers.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::error::{FrameError, Result};

/// Eye id of the left eye crop.
pub const LEFT_EYE: u8 = 0;
/// Eye id of the right eye crop.
pub const RIGHT_EYE: u8 = 1;

/// Upper bound for a single compressed image.
pub const MAX_EYE_IMAGE_BYTES: usize = 8 * 1024 * 1024;

/// Per-image record header: eye (1) + width (2) + height (2) + length (4).
const RECORD_HEADER_SIZE: usize = 9;

/// One compressed eye crop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EyeImage {
    pub eye: u8,
    pub width: u16,
    pub height: u16,
    /// Compressed image bytes (JPEG from the perception unit).
    pub data: Bytes,
}

/// Decode an eye preview payload.
///
/// Any inconsistency discards the whole payload: the result is either every
/// declared image or none.
pub fn decode_eye_images(payload: Bytes) -> Vec<EyeImage> {
    match try_decode_eye_images(payload) {
        Ok(images) => images,
        Err(err) => {
            warn!(error = %err, "discarding eye preview payload");
            Vec::new()
        }
    }
}

/// Decode an eye preview payload, reporting why it was rejected.
pub fn try_decode_eye_images(mut payload: Bytes) -> Result<Vec<EyeImage>> {
    if !payload.has_remaining() {
        return Err(malformed("empty payload"));
    }
    let count = usize::from(payload.get_u8());
    let mut images = Vec::with_capacity(count);

    for index in 0..count {
        if payload.remaining() < RECORD_HEADER_SIZE {
            return Err(malformed(format!(
                "image {index}: header truncated ({} bytes left)",
                payload.remaining()
            )));
        }
        let eye = payload.get_u8();
        let width = payload.get_u16_le();
        let height = payload.get_u16_le();
        let length = payload.get_u32_le() as usize;

        if width == 0 || height == 0 {
            return Err(malformed(format!(
                "image {index}: zero dimension {width}x{height}"
            )));
        }
        if length == 0 {
            return Err(malformed(format!("image {index}: zero length")));
        }
        if length > MAX_EYE_IMAGE_BYTES {
            return Err(malformed(format!(
                "image {index}: {length} bytes exceeds cap {MAX_EYE_IMAGE_BYTES}"
            )));
        }
        if length > payload.remaining() {
            return Err(malformed(format!(
                "image {index}: declares {length} bytes, {} left",
                payload.remaining()
            )));
        }

        images.push(EyeImage {
            eye,
            width,
            height,
            data: payload.split_to(length),
        });
    }

    if payload.has_remaining() {
        return Err(malformed(format!(
            "{} trailing bytes after {count} images",
            payload.remaining()
        )));
    }

    Ok(images)
}

/// Encode eye crops in the layout [`decode_eye_images`] expects.
pub fn encode_eye_images(images: &[EyeImage]) -> Result<Bytes> {
    let count = u8::try_from(images.len())
        .map_err(|_| malformed(format!("{} images exceed the 255 limit", images.len())))?;

    let body: usize = images
        .iter()
        .map(|image| RECORD_HEADER_SIZE + image.data.len())
        .sum();
    let mut out = BytesMut::with_capacity(1 + body);
    out.put_u8(count);

    for image in images {
        if image.width == 0 || image.height == 0 || image.data.is_empty() {
            return Err(malformed(format!("eye {}: empty image", image.eye)));
        }
        if image.data.len() > MAX_EYE_IMAGE_BYTES {
            return Err(malformed(format!(
                "eye {}: {} bytes exceeds cap",
                image.eye,
                image.data.len()
            )));
        }
        out.put_u8(image.eye);
        out.put_u16_le(image.width);
        out.put_u16_le(image.height);
        out.put_u32_le(image.data.len() as u32);
        out.put_slice(&image.data);
    }

    Ok(out.freeze())
}

fn malformed(reason: impl Into<String>) -> FrameError {
    FrameError::MalformedEyeImages(reason.into())
}
