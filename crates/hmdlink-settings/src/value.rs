use std::fmt;

use serde_json::Value;

use crate::schema::{DefaultValue, SettingKind};

/// A typed setting value.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Number(f64),
    Text(String),
    Flag(bool),
}

impl SettingValue {
    pub fn kind(&self) -> SettingKind {
        match self {
            Self::Number(_) => SettingKind::Number,
            Self::Text(_) => SettingKind::Text,
            Self::Flag(_) => SettingKind::Flag,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(b) => Some(*b),
            _ => None,
        }
    }

    /// Best-effort typing of a command-line value: flags, then numbers, then text.
    pub fn parse_loose(raw: &str) -> Self {
        let raw = raw.trim();
        match raw {
            "true" => return Self::Flag(true),
            "false" => return Self::Flag(false),
            _ => {}
        }
        match raw.parse::<f64>() {
            Ok(n) if n.is_finite() => Self::Number(n),
            _ => Self::Text(raw.to_string()),
        }
    }

    /// Convert a JSON scalar. Arrays, objects and null are rejected.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Flag(*b)),
            Value::Number(n) => n.as_f64().map(Self::Number),
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Text(s) => Value::String(s.clone()),
            Self::Flag(b) => Value::Bool(*b),
        }
    }

    /// Coerce into `kind`, converting textual forms where unambiguous.
    pub(crate) fn coerce(self, kind: SettingKind) -> Option<Self> {
        match (kind, self) {
            (SettingKind::Number, Self::Number(n)) => Some(Self::Number(n)),
            (SettingKind::Number, Self::Text(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Self::Number),
            (SettingKind::Flag, Self::Flag(b)) => Some(Self::Flag(b)),
            (SettingKind::Flag, Self::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(Self::Flag(true)),
                "false" | "0" | "no" | "off" => Some(Self::Flag(false)),
                _ => None,
            },
            (SettingKind::Flag, Self::Number(n)) if n == 0.0 || n == 1.0 => {
                Some(Self::Flag(n == 1.0))
            }
            (SettingKind::Text, Self::Text(s)) => Some(Self::Text(s)),
            (SettingKind::Text, Self::Number(n)) => Some(Self::Text(n.to_string())),
            (SettingKind::Text, Self::Flag(b)) => Some(Self::Text(b.to_string())),
            _ => None,
        }
    }
}

impl From<DefaultValue> for SettingValue {
    fn from(value: DefaultValue) -> Self {
        match value {
            DefaultValue::Number(n) => Self::Number(n),
            DefaultValue::Text(s) => Self::Text(s.to_string()),
            DefaultValue::Flag(b) => Self::Flag(b),
        }
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::Flag(b) => write!(f, "{b}"),
        }
    }
}
