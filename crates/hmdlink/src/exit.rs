use std::fmt;
use std::io;

use hmdlink::frame::FrameError;
use hmdlink::link::LinkError;
use hmdlink::settings::SettingsError;
use hmdlink::transport::TransportError;
use hmdlink::ControllerError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const CONFIG_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => TRANSPORT_ERROR,
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Connect { source, .. } | TransportError::Io(source) => {
            io_error(context, source)
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } | FrameError::MalformedEyeImages(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn settings_error(context: &str, err: SettingsError) -> CliError {
    CliError::new(CONFIG_INVALID, format!("{context}: {err}"))
}

pub fn link_error(context: &str, err: LinkError) -> CliError {
    match err {
        LinkError::Transport(err) => transport_error(context, err),
        LinkError::Frame(err) => frame_error(context, err),
        LinkError::SendFailed { source, .. } => frame_error(context, source),
        LinkError::Settings(err) => settings_error(context, err),
        LinkError::InvalidConfig(_) => CliError::new(CONFIG_INVALID, format!("{context}: {err}")),
        LinkError::Json(_) | LinkError::Image(_) | LinkError::FormatMismatch { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        LinkError::Disconnected | LinkError::NoLink(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

pub fn controller_error(context: &str, err: ControllerError) -> CliError {
    match err {
        ControllerError::Settings(err) => settings_error(context, err),
        ControllerError::Link(err) => link_error(context, err),
        ControllerError::Tracking(err) => {
            CliError::new(CONFIG_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_connection_is_a_transport_error() {
        let err = io_error(
            "connect failed",
            io::Error::from(io::ErrorKind::ConnectionRefused),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert!(err.message.starts_with("connect failed"));
    }

    #[test]
    fn settings_errors_are_config_invalid() {
        let err = settings_error("bad --set", SettingsError::UnknownKey("imu.nope".into()));
        assert_eq!(err.code, CONFIG_INVALID);
    }

    #[test]
    fn oversized_payload_is_usage() {
        let err = link_error(
            "send failed",
            LinkError::Frame(FrameError::PayloadTooLarge { size: 10, max: 5 }),
        );
        assert_eq!(err.code, USAGE);
    }
}
