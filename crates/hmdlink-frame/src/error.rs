/// Errors that can occur during packet encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size or the 24-bit wire range.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The header carries a type byte outside the known enumeration.
    ///
    /// The packet has already been skipped when this is returned.
    #[error("unknown message type 0x{byte:02x} ({length} byte payload skipped)")]
    UnknownMessageType { byte: u8, length: usize },

    /// An eye preview payload failed validation.
    #[error("malformed eye image payload: {0}")]
    MalformedEyeImages(String),

    /// An I/O error occurred while reading or writing packets.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete packet was received.
    #[error("connection closed (incomplete packet)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
