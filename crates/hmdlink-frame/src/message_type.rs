//! Message types shared by both ends of the link.
//!
//! The type byte is a closed enumeration; both peers must agree on it.

use std::fmt;

/// Logical message kind carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageType {
    /// Inertial sample (gyro, accel, optional mag).
    Imu = 0x01,
    /// JSON control command.
    Control = 0x02,
    /// JSON settings push.
    Config = 0x03,
    /// JSON log record from the peer.
    Log = 0x04,
    /// Compressed tracker camera preview.
    TrackerPreview = 0x05,
    /// Stereo eye crops in the eye-image sub-protocol.
    EyePreview = 0x06,
    /// JSON scene calibration markers.
    SceneMarkers = 0x07,
    /// Estimated fixation distance (f32 meters).
    GazeDistance = 0x08,
    /// Per-eye pixel deltas.
    EyeVectors = 0x09,
    /// JSON gaze calibration model.
    GazeCalibration = 0x0A,
    /// Rendered frame capture for scene calibration.
    SceneCapture = 0x0B,
}

impl MessageType {
    /// Every known message type, in wire order.
    pub const ALL: [MessageType; 11] = [
        MessageType::Imu,
        MessageType::Control,
        MessageType::Config,
        MessageType::Log,
        MessageType::TrackerPreview,
        MessageType::EyePreview,
        MessageType::SceneMarkers,
        MessageType::GazeDistance,
        MessageType::EyeVectors,
        MessageType::GazeCalibration,
        MessageType::SceneCapture,
    ];

    /// Parse a header type byte. Returns `None` for unknown values.
    pub fn from_u8(byte: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|ty| ty.as_u8() == byte)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable name used in logs and CLI output.
    pub fn name(self) -> &'static str {
        match self {
            MessageType::Imu => "IMU",
            MessageType::Control => "CONTROL",
            MessageType::Config => "CONFIG",
            MessageType::Log => "LOG",
            MessageType::TrackerPreview => "TRACKER_PREVIEW",
            MessageType::EyePreview => "EYE_PREVIEW",
            MessageType::SceneMarkers => "SCENE_MARKERS",
            MessageType::GazeDistance => "GAZE_DISTANCE",
            MessageType::EyeVectors => "EYE_VECTORS",
            MessageType::GazeCalibration => "GAZE_CALIBRATION",
            MessageType::SceneCapture => "SCENE_CAPTURE",
        }
    }

    /// Parse a name as printed by [`MessageType::name`], case-insensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = name.trim().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|ty| ty.name().eq_ignore_ascii_case(&wanted))
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(byte: u8) -> std::result::Result<Self, Self::Error> {
        Self::from_u8(byte).ok_or(byte)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
