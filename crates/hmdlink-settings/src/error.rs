use crate::schema::SettingKind;

/// Errors raised while reading or changing settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Key is not of the form `<module>.<field>`.
    #[error("malformed setting key {0:?}; expected <module>.<field>")]
    MalformedKey(String),

    /// No setter is registered for the key.
    #[error("unknown setting {0:?}")]
    UnknownKey(String),

    /// Value cannot be converted to the setting's kind.
    #[error("{key} expects a {expected} value, got {found:?}")]
    KindMismatch {
        key: String,
        expected: SettingKind,
        found: String,
    },

    /// Value violates the setting's constraint.
    #[error("{key} = {value} violates constraint {constraint}")]
    OutOfRange {
        key: String,
        value: String,
        constraint: String,
    },

    /// Assignment is not of the form `key=value`.
    #[error("invalid assignment {0:?}; expected <module>.<field>=<value>")]
    InvalidAssignment(String),

    /// Settings document has an unexpected shape.
    #[error("invalid settings document: {0}")]
    InvalidDocument(String),

    /// Settings document is not valid JSON.
    #[error("settings document is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SettingsError>;
