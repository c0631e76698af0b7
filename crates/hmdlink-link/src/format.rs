use std::io::Cursor;

use bytes::Bytes;
use image::{DynamicImage, ImageFormat};
use serde_json::Value;

use crate::error::{LinkError, Result};
use crate::route::WireFormat;

/// In-process form of a routed payload.
#[derive(Debug, Clone)]
pub enum Message {
    Json(Value),
    Image(DynamicImage),
    Raw(Bytes),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::Image(_) => "image",
            Self::Raw(_) => "raw",
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&DynamicImage> {
        match self {
            Self::Image(image) => Some(image),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> Option<&Bytes> {
        match self {
            Self::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<DynamicImage> for Message {
    fn from(image: DynamicImage) -> Self {
        Self::Image(image)
    }
}

impl From<Bytes> for Message {
    fn from(bytes: Bytes) -> Self {
        Self::Raw(bytes)
    }
}

/// Serialize a message for the wire.
pub fn encode(format: WireFormat, message: &Message) -> Result<Bytes> {
    match (format, message) {
        (WireFormat::Raw, Message::Raw(bytes)) => Ok(bytes.clone()),
        (WireFormat::Json, Message::Json(value)) => Ok(Bytes::from(serde_json::to_vec(value)?)),
        (WireFormat::Png, Message::Image(image)) => encode_image(image, ImageFormat::Png),
        (WireFormat::Jpeg, Message::Image(image)) => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            encode_image(&rgb, ImageFormat::Jpeg)
        }
        (format, message) => Err(LinkError::FormatMismatch {
            format,
            found: message.kind(),
        }),
    }
}

/// Parse a wire payload.
pub fn decode(format: WireFormat, payload: Bytes) -> Result<Message> {
    match format {
        WireFormat::Raw => Ok(Message::Raw(payload)),
        WireFormat::Json => Ok(Message::Json(serde_json::from_slice(&payload)?)),
        WireFormat::Png => decode_image(&payload, ImageFormat::Png),
        WireFormat::Jpeg => decode_image(&payload, ImageFormat::Jpeg),
    }
}

fn encode_image(image: &DynamicImage, format: ImageFormat) -> Result<Bytes> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format)?;
    Ok(Bytes::from(out.into_inner()))
}

fn decode_image(payload: &[u8], format: ImageFormat) -> Result<Message> {
    Ok(Message::Image(image::load_from_memory_with_format(
        payload, format,
    )?))
}
