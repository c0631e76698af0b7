/// Errors raised by the tracking pipeline.
///
/// Only configuration-time failures are fatal; per-sample errors are logged
/// and the sample dropped.
#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    /// Filter gain outside `[0, 1]`.
    #[error("{name} must be within [0, 1], got {value}")]
    InvalidGain { name: &'static str, value: f32 },

    /// Negative or non-finite threshold.
    #[error("{name} must be a non-negative finite number, got {value}")]
    InvalidThreshold { name: &'static str, value: f32 },

    /// Sample period not strictly positive.
    #[error("sample period must be positive, got {0}")]
    InvalidSamplePeriod(f32),

    /// Other invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// IMU payload length matches no known layout.
    #[error("IMU payload of {0} bytes matches no known layout")]
    MalformedImu(usize),

    /// Eye vector payload has the wrong length.
    #[error("eye vector payload must be 16 bytes, got {0}")]
    MalformedEyeVectors(usize),

    /// Calibration model is structurally invalid.
    #[error("invalid gaze calibration: {0}")]
    InvalidCalibration(String),

    /// Calibration JSON could not be parsed.
    #[error("gaze calibration json: {0}")]
    Json(#[from] serde_json::Error),

    /// Settings could not be read.
    #[error("settings error: {0}")]
    Settings(#[from] hmdlink_settings::SettingsError),
}

pub type Result<T> = std::result::Result<T, TrackingError>;
