//! Head-mounted display controller.
//!
//! hmdlink links a headset to its perception unit over one framed TCP stream,
//! fuses IMU samples into a head orientation, and turns calibrated eye vectors
//! into a gaze distance. [`HeadsetController`] wires the pieces together; the
//! layers underneath are re-exported for direct use.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP connection primitive
//! - [`frame`]: Packet codec, reassembly and the eye-image sub-protocol
//! - [`settings`]: Enumerated key/value settings with change observers
//! - [`link`]: Stream transport, routing, transcoding, workers and events
//! - [`tracking`]: Orientation filter, gaze estimation and lock-free published state

mod controller;
mod error;

pub use controller::{ControllerConfig, HeadsetController, REMOTE_LOG_TARGET};
pub use error::{ControllerError, Result};

/// Re-export transport types.
pub mod transport {
    pub use hmdlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use hmdlink_frame::*;
}

/// Re-export settings types.
pub mod settings {
    pub use hmdlink_settings::*;
}

/// Re-export link types.
pub mod link {
    pub use hmdlink_link::*;
}

/// Re-export tracking types.
pub mod tracking {
    pub use hmdlink_tracking::*;
}
