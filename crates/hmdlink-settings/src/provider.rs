use std::sync::Arc;

use crate::error::{Result, SettingsError};
use crate::schema::{Setting, SettingKind};
use crate::value::SettingValue;

/// Callback invoked after a setting changes.
///
/// Runs synchronously on the thread that made the change and must not block.
pub type SettingObserver = Arc<dyn Fn(Setting, &SettingValue) + Send + Sync>;

/// Source of configuration values handed to every component.
pub trait SettingsProvider: Send + Sync {
    /// Current value, or `None` if the provider does not hold one.
    fn get(&self, setting: Setting) -> Option<SettingValue>;

    /// Register a change observer.
    fn subscribe(&self, observer: SettingObserver);

    /// Current value, falling back to the compiled default.
    fn value(&self, setting: Setting) -> SettingValue {
        self.get(setting)
            .unwrap_or_else(|| SettingValue::from(setting.spec().default))
    }

    fn number(&self, setting: Setting) -> Result<f64> {
        let value = self.value(setting);
        value
            .as_number()
            .ok_or_else(|| mismatch(setting, SettingKind::Number, &value))
    }

    fn text(&self, setting: Setting) -> Result<String> {
        match self.value(setting) {
            SettingValue::Text(text) => Ok(text),
            other => Err(mismatch(setting, SettingKind::Text, &other)),
        }
    }

    fn flag(&self, setting: Setting) -> Result<bool> {
        let value = self.value(setting);
        value
            .as_flag()
            .ok_or_else(|| mismatch(setting, SettingKind::Flag, &value))
    }
}

fn mismatch(setting: Setting, expected: SettingKind, found: &SettingValue) -> SettingsError {
    SettingsError::KindMismatch {
        key: setting.key(),
        expected,
        found: found.to_string(),
    }
}
