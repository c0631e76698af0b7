/// Errors surfaced by [`crate::HeadsetController`].
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Settings rejected at startup or on update.
    #[error("settings error: {0}")]
    Settings(#[from] hmdlink_settings::SettingsError),

    /// Link, routing or transport failure.
    #[error("link error: {0}")]
    Link(#[from] hmdlink_link::LinkError),

    /// Tracking configuration rejected.
    #[error("tracking error: {0}")]
    Tracking(#[from] hmdlink_tracking::TrackingError),

    /// `connect` called while a stream is already attached.
    #[error("already connected to {0}")]
    AlreadyConnected(String),
}

pub type Result<T> = std::result::Result<T, ControllerError>;
