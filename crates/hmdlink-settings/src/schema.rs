use std::fmt;

/// Value kind of a setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKind {
    Number,
    Text,
    Flag,
}

impl SettingKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Text => "text",
            Self::Flag => "flag",
        }
    }
}

impl fmt::Display for SettingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compile-time default of a setting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Number(f64),
    Text(&'static str),
    Flag(bool),
}

/// Validation rule applied by a setting's setter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constraint {
    Any,
    NonEmpty,
    /// Inclusive range.
    Between { min: f64, max: f64 },
    /// Strictly greater than the bound.
    Above(f64),
    /// Whole number within an inclusive range.
    Integer { min: i64, max: i64 },
    OneOf(&'static [&'static str]),
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::NonEmpty => f.write_str("non-empty"),
            Self::Between { min, max } if max.is_infinite() => write!(f, ">= {min}"),
            Self::Between { min, max } => write!(f, "{min}..={max}"),
            Self::Above(bound) => write!(f, "> {bound}"),
            Self::Integer { min, max } => write!(f, "integer {min}..={max}"),
            Self::OneOf(options) => write!(f, "one of {}", options.join("|")),
        }
    }
}

/// Static description of one setting.
#[derive(Debug, Clone, Copy)]
pub struct SettingSpec {
    pub module: &'static str,
    pub field: &'static str,
    pub kind: SettingKind,
    pub default: DefaultValue,
    pub constraint: Constraint,
    pub summary: &'static str,
}

/// Every setting the headset link understands.
///
/// Keys render as `"<module>.<field>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Setting {
    PeerHost,
    PeerPort,
    ConnectTimeoutMs,
    ReadTimeoutMs,
    SendTimeoutMs,
    MaxPacketSize,
    MaxSendRetries,
    JoinTimeoutMs,
    InboundQueueCapacity,
    RouterMode,
    BetaMoving,
    BetaStill,
    MovingThreshold,
    MinGyroThreshold,
    SamplePeriod,
    UseMagnetometer,
    NearFieldThreshold,
    VergenceEpsilonDeg,
    AngularTracking,
    MinSendIntervalMs,
    ChangeRatio,
    WorkerQueueCapacity,
}

const PACKET_MAX: i64 = 0x00FF_FFFF;

impl Setting {
    pub const ALL: [Setting; 22] = [
        Self::PeerHost,
        Self::PeerPort,
        Self::ConnectTimeoutMs,
        Self::ReadTimeoutMs,
        Self::SendTimeoutMs,
        Self::MaxPacketSize,
        Self::MaxSendRetries,
        Self::JoinTimeoutMs,
        Self::InboundQueueCapacity,
        Self::RouterMode,
        Self::BetaMoving,
        Self::BetaStill,
        Self::MovingThreshold,
        Self::MinGyroThreshold,
        Self::SamplePeriod,
        Self::UseMagnetometer,
        Self::NearFieldThreshold,
        Self::VergenceEpsilonDeg,
        Self::AngularTracking,
        Self::MinSendIntervalMs,
        Self::ChangeRatio,
        Self::WorkerQueueCapacity,
    ];

    pub fn spec(self) -> SettingSpec {
        use Constraint::*;
        use DefaultValue as D;
        use SettingKind::*;

        let (module, field, kind, default, constraint, summary) = match self {
            Self::PeerHost => (
                "transport",
                "peer_host",
                Text,
                D::Text("192.168.137.2"),
                NonEmpty,
                "perception unit host name or address",
            ),
            Self::PeerPort => (
                "transport",
                "peer_port",
                Number,
                D::Number(5005.0),
                Integer { min: 1, max: 65535 },
                "perception unit TCP port",
            ),
            Self::ConnectTimeoutMs => (
                "transport",
                "connect_timeout_ms",
                Number,
                D::Number(3000.0),
                Above(0.0),
                "single connect attempt timeout",
            ),
            Self::ReadTimeoutMs => (
                "transport",
                "read_timeout_ms",
                Number,
                D::Number(100.0),
                Above(0.0),
                "receive loop read timeout",
            ),
            Self::SendTimeoutMs => (
                "transport",
                "send_timeout_ms",
                Number,
                D::Number(500.0),
                Above(0.0),
                "socket write timeout",
            ),
            Self::MaxPacketSize => (
                "transport",
                "max_packet_size",
                Number,
                D::Number(PACKET_MAX as f64),
                Integer {
                    min: 1,
                    max: PACKET_MAX,
                },
                "largest accepted payload in bytes",
            ),
            Self::MaxSendRetries => (
                "transport",
                "max_send_retries",
                Number,
                D::Number(3.0),
                Integer { min: 0, max: 16 },
                "send attempts after the first failure",
            ),
            Self::JoinTimeoutMs => (
                "transport",
                "join_timeout_ms",
                Number,
                D::Number(1000.0),
                Above(0.0),
                "bounded wait when joining background threads",
            ),
            Self::InboundQueueCapacity => (
                "transport",
                "inbound_queue_capacity",
                Number,
                D::Number(1024.0),
                Integer {
                    min: 1,
                    max: i64::from(u32::MAX),
                },
                "received packets buffered ahead of the router",
            ),
            Self::RouterMode => (
                "router",
                "mode",
                Text,
                D::Text("companion"),
                OneOf(&["companion", "standalone"]),
                "routing table selected at startup",
            ),
            Self::BetaMoving => (
                "imu",
                "beta_moving",
                Number,
                D::Number(0.033),
                Between { min: 0.0, max: 1.0 },
                "filter gain while the head moves",
            ),
            Self::BetaStill => (
                "imu",
                "beta_still",
                Number,
                D::Number(0.1),
                Between { min: 0.0, max: 1.0 },
                "filter gain while the head is still",
            ),
            Self::MovingThreshold => (
                "imu",
                "moving_threshold",
                Number,
                D::Number(0.2),
                Between {
                    min: 0.0,
                    max: f64::INFINITY,
                },
                "gyro magnitude (rad/s) selecting the moving gain",
            ),
            Self::MinGyroThreshold => (
                "imu",
                "min_gyro_threshold",
                Number,
                D::Number(0.005),
                Between {
                    min: 0.0,
                    max: f64::INFINITY,
                },
                "gyro magnitude (rad/s) treated as zero",
            ),
            Self::SamplePeriod => (
                "imu",
                "sample_period",
                Number,
                D::Number(0.002),
                Above(0.0),
                "integration step in seconds",
            ),
            Self::UseMagnetometer => (
                "imu",
                "use_magnetometer",
                Flag,
                D::Flag(true),
                Any,
                "fuse magnetometer when present",
            ),
            Self::NearFieldThreshold => (
                "gaze",
                "near_field_threshold",
                Number,
                D::Number(2.0),
                Above(0.0),
                "vergence distance (m) beyond which raycast wins",
            ),
            Self::VergenceEpsilonDeg => (
                "gaze",
                "vergence_epsilon_deg",
                Number,
                D::Number(0.05),
                Between {
                    min: 0.0,
                    max: f64::INFINITY,
                },
                "vergence below this is treated as infinite distance",
            ),
            Self::AngularTracking => (
                "gaze",
                "angular_tracking",
                Flag,
                D::Flag(true),
                Any,
                "raycast along the gaze instead of straight ahead",
            ),
            Self::MinSendIntervalMs => (
                "gaze",
                "min_send_interval_ms",
                Number,
                D::Number(100.0),
                Between {
                    min: 0.0,
                    max: f64::INFINITY,
                },
                "minimum spacing of distance updates",
            ),
            Self::ChangeRatio => (
                "gaze",
                "change_ratio",
                Number,
                D::Number(1.1),
                Between {
                    min: 1.0,
                    max: f64::INFINITY,
                },
                "relative change required to send a new distance",
            ),
            Self::WorkerQueueCapacity => (
                "workers",
                "queue_capacity",
                Number,
                D::Number(256.0),
                Integer {
                    min: 1,
                    max: i64::from(u32::MAX),
                },
                "per-worker bounded queue length",
            ),
        };

        SettingSpec {
            module,
            field,
            kind,
            default,
            constraint,
            summary,
        }
    }

    pub fn module(self) -> &'static str {
        self.spec().module
    }

    pub fn field(self) -> &'static str {
        self.spec().field
    }

    pub fn kind(self) -> SettingKind {
        self.spec().kind
    }

    /// `"<module>.<field>"`.
    pub fn key(self) -> String {
        let spec = self.spec();
        format!("{}.{}", spec.module, spec.field)
    }

    /// Look up a setting by its dotted key.
    pub fn from_key(key: &str) -> Option<Self> {
        let (module, field) = split_key(key)?;
        Self::ALL
            .into_iter()
            .find(|s| s.module() == module && s.field() == field)
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let spec = self.spec();
        write!(f, "{}.{}", spec.module, spec.field)
    }
}

pub(crate) fn split_key(key: &str) -> Option<(&str, &str)> {
    let (module, field) = key.trim().split_once('.')?;
    if module.is_empty() || field.is_empty() || field.contains('.') {
        return None;
    }
    Some((module, field))
}
