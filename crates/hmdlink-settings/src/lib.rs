//! Key/value settings for the headset link.
//!
//! Every tunable is a variant of [`Setting`] with a `"<module>.<field>"` key,
//! a kind, a default and a constraint. [`SettingsRegistry`] resolves keys
//! through a setter table built at construction and notifies observers
//! synchronously after each change. Components receive a
//! [`SettingsProvider`] rather than reaching for global state.

pub mod error;
pub mod provider;
pub mod registry;
pub mod schema;
pub mod value;

pub use error::{Result, SettingsError};
pub use provider::{SettingObserver, SettingsProvider};
pub use registry::{ApplyReport, SettingsRegistry};
pub use schema::{Constraint, DefaultValue, Setting, SettingKind, SettingSpec};
pub use value::SettingValue;
