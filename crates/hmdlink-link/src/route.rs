use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use hmdlink_frame::MessageType;
use hmdlink_settings::{Setting, SettingsProvider};

use crate::error::{LinkError, Result};

/// Where a message originates or is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// The framed TCP stream to the perception unit.
    Stream,
    /// A locally attached peripheral (e.g. a USB IMU).
    LocalPeripheral,
    /// This process.
    Process,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stream => "stream",
            Self::LocalPeripheral => "local-peripheral",
            Self::Process => "process",
        })
    }
}

/// Payload encoding on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireFormat {
    Json,
    Png,
    Jpeg,
    Raw,
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Raw => "raw",
        })
    }
}

/// How one message type travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub source: Endpoint,
    pub target: Endpoint,
    pub format: WireFormat,
}

impl Route {
    pub const fn new(source: Endpoint, target: Endpoint, format: WireFormat) -> Self {
        Self {
            source,
            target,
            format,
        }
    }

    /// A route that starts and ends at the same endpoint is a no-op and never valid.
    pub fn is_valid(&self) -> bool {
        self.source != self.target
    }

    /// Payloads are encoded only when this process produces them.
    pub fn encodes_locally(&self) -> bool {
        self.source == Endpoint::Process
    }

    /// Payloads are decoded only when this process consumes them.
    pub fn decodes_locally(&self) -> bool {
        self.target == Endpoint::Process
    }

    /// Both ends external: bytes are relayed untouched.
    pub fn is_pass_through(&self) -> bool {
        !self.encodes_locally() && !self.decodes_locally()
    }
}

/// Which routing table is loaded at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperatingMode {
    /// IMU and eye data arrive from the perception unit.
    #[default]
    Companion,
    /// IMU comes from a locally attached peripheral.
    Standalone,
}

impl OperatingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Companion => "companion",
            Self::Standalone => "standalone",
        }
    }

    pub fn from_settings(settings: &dyn SettingsProvider) -> Result<Self> {
        settings.text(Setting::RouterMode)?.parse()
    }
}

impl FromStr for OperatingMode {
    type Err = LinkError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "companion" => Ok(Self::Companion),
            "standalone" => Ok(Self::Standalone),
            other => Err(LinkError::InvalidConfig(format!(
                "unknown router mode {other:?}"
            ))),
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable message type to route mapping.
#[derive(Debug, Clone)]
pub struct RouteTable {
    mode: OperatingMode,
    routes: HashMap<MessageType, Route>,
}

impl RouteTable {
    /// The fixed table for an operating mode.
    pub fn for_mode(mode: OperatingMode) -> Self {
        use Endpoint::{LocalPeripheral, Process, Stream};
        use MessageType as T;
        use WireFormat::{Jpeg, Json, Png, Raw};

        let mut routes = vec![
            (T::Imu, Route::new(Stream, Process, Raw)),
            (T::Control, Route::new(Process, Stream, Json)),
            (T::Config, Route::new(Stream, Process, Json)),
            (T::Log, Route::new(Stream, Process, Json)),
            (T::TrackerPreview, Route::new(Stream, Process, Jpeg)),
            (T::EyePreview, Route::new(Stream, Process, Raw)),
            (T::SceneMarkers, Route::new(Process, Stream, Json)),
            (T::GazeDistance, Route::new(Process, Stream, Raw)),
            (T::EyeVectors, Route::new(Stream, Process, Raw)),
            (T::GazeCalibration, Route::new(Stream, Process, Json)),
            (T::SceneCapture, Route::new(Process, Stream, Png)),
        ];

        if mode == OperatingMode::Standalone {
            for (message_type, route) in &mut routes {
                match message_type {
                    T::Imu => *route = Route::new(LocalPeripheral, Process, Raw),
                    T::Log => *route = Route::new(LocalPeripheral, Stream, Raw),
                    _ => {}
                }
            }
        }

        Self::from_routes(mode, routes)
    }

    /// Build a table from explicit routes.
    pub fn from_routes(
        mode: OperatingMode,
        routes: impl IntoIterator<Item = (MessageType, Route)>,
    ) -> Self {
        Self {
            mode,
            routes: routes.into_iter().collect(),
        }
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn get(&self, message_type: MessageType) -> Option<Route> {
        self.routes.get(&message_type).copied()
    }

    /// Routes in wire-byte order.
    pub fn iter(&self) -> impl Iterator<Item = (MessageType, Route)> + '_ {
        MessageType::ALL
            .into_iter()
            .filter_map(|ty| self.get(ty).map(|route| (ty, route)))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
