use hmdlink_frame::MessageType;

use crate::route::{Endpoint, WireFormat};

/// Errors that can occur on the perception link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] hmdlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] hmdlink_frame::FrameError),

    /// Settings could not be read.
    #[error("settings error: {0}")]
    Settings(#[from] hmdlink_settings::SettingsError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image encode/decode error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Payload failed its JSON schema.
    #[cfg(feature = "schema")]
    #[error("schema validation failed for {message_type}: {message}")]
    Schema {
        message_type: MessageType,
        message: String,
    },

    /// No route is configured for the message type.
    #[error("no route for {0}")]
    NoRoute(MessageType),

    /// Route has identical source and target.
    #[error("route for {0} has identical source and target")]
    InvalidRoute(MessageType),

    /// Message arrived from an endpoint other than its route's source.
    #[error("{message_type} from {origin} but its route starts at {expected}")]
    WrongOrigin {
        message_type: MessageType,
        origin: Endpoint,
        expected: Endpoint,
    },

    /// No local handler is registered for a locally delivered type.
    #[error("no local handler for {0}")]
    NoHandler(MessageType),

    /// No link is attached for the route's target endpoint.
    #[error("no link attached for {0}")]
    NoLink(Endpoint),

    /// Message variant does not fit the route's wire format.
    #[error("{found} message cannot be encoded as {format}")]
    FormatMismatch {
        format: WireFormat,
        found: &'static str,
    },

    /// The stream is not connected.
    #[error("link disconnected")]
    Disconnected,

    /// Send failed after exhausting retries.
    #[error("send of {message_type} failed after {attempts} attempts: {source}")]
    SendFailed {
        message_type: MessageType,
        attempts: u32,
        #[source]
        source: hmdlink_frame::FrameError,
    },

    /// Invalid component configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Background thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, LinkError>;
