use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, SettingsError};
use crate::provider::{SettingObserver, SettingsProvider};
use crate::schema::{split_key, Constraint, Setting};
use crate::value::SettingValue;

type Setter = Box<dyn Fn(SettingValue) -> Result<SettingValue> + Send + Sync>;

/// Outcome of applying a settings document.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub applied: Vec<Setting>,
    pub rejected: Vec<(String, SettingsError)>,
}

/// In-memory settings store.
///
/// Holds a `(module, field) -> setter` table built once at construction.
/// Each setter coerces its input to the setting's kind and checks the
/// constraint; the registry then stores the value and notifies observers.
pub struct SettingsRegistry {
    setters: HashMap<&'static str, HashMap<&'static str, Setter>>,
    values: RwLock<BTreeMap<Setting, SettingValue>>,
    observers: RwLock<Vec<SettingObserver>>,
}

impl SettingsRegistry {
    /// Registry holding every default.
    pub fn new() -> Self {
        let mut setters: HashMap<&'static str, HashMap<&'static str, Setter>> = HashMap::new();
        let mut values = BTreeMap::new();
        for setting in Setting::ALL {
            let spec = setting.spec();
            setters
                .entry(spec.module)
                .or_default()
                .insert(spec.field, build_setter(setting));
            values.insert(setting, SettingValue::from(spec.default));
        }

        Self {
            setters,
            values: RwLock::new(values),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Registry with `key=value` assignments applied over the defaults.
    ///
    /// Fails on the first invalid assignment.
    pub fn from_assignments<I, S>(assignments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let registry = Self::new();
        for assignment in assignments {
            registry.set_str(assignment.as_ref())?;
        }
        Ok(registry)
    }

    /// Set a setting from a typed value.
    pub fn set(&self, setting: Setting, value: impl Into<SettingValue>) -> Result<()> {
        self.set_key(&setting.key(), value.into()).map(|_| ())
    }

    /// Set a setting by its dotted key.
    pub fn set_key(&self, key: &str, value: SettingValue) -> Result<Setting> {
        let (module, field) =
            split_key(key).ok_or_else(|| SettingsError::MalformedKey(key.to_string()))?;
        let setter = self
            .setters
            .get(module)
            .and_then(|fields| fields.get(field))
            .ok_or_else(|| SettingsError::UnknownKey(key.trim().to_string()))?;
        let setting =
            Setting::from_key(key).ok_or_else(|| SettingsError::UnknownKey(key.to_string()))?;

        let value = setter(value)?;
        self.store(setting, value);
        Ok(setting)
    }

    /// Apply a `<module>.<field>=<value>` assignment.
    pub fn set_str(&self, assignment: &str) -> Result<Setting> {
        let (key, raw) = assignment
            .split_once('=')
            .ok_or_else(|| SettingsError::InvalidAssignment(assignment.to_string()))?;
        self.set_key(key, SettingValue::parse_loose(raw))
    }

    /// Apply a settings document.
    ///
    /// Accepts `{"key": "<module>.<field>", "value": <scalar>}` or
    /// `{"settings": {"<module>.<field>": <scalar>, ...}}`. Entries that fail
    /// are reported and skipped; the rest are applied.
    pub fn apply_json(&self, document: &Value) -> Result<ApplyReport> {
        let object = document
            .as_object()
            .ok_or_else(|| SettingsError::InvalidDocument("expected a JSON object".into()))?;

        let entries: Vec<(String, &Value)> = if let Some(settings) = object.get("settings") {
            let settings = settings.as_object().ok_or_else(|| {
                SettingsError::InvalidDocument("\"settings\" must be an object".into())
            })?;
            settings.iter().map(|(k, v)| (k.clone(), v)).collect()
        } else {
            let key = object
                .get("key")
                .and_then(Value::as_str)
                .ok_or_else(|| SettingsError::InvalidDocument("missing string \"key\"".into()))?;
            let value = object
                .get("value")
                .ok_or_else(|| SettingsError::InvalidDocument("missing \"value\"".into()))?;
            vec![(key.to_string(), value)]
        };

        let mut report = ApplyReport::default();
        for (key, raw) in entries {
            let outcome = match SettingValue::from_json(raw) {
                Some(value) => self.set_key(&key, value),
                None => Err(SettingsError::InvalidDocument(format!(
                    "{key}: value must be a scalar"
                ))),
            };
            match outcome {
                Ok(setting) => report.applied.push(setting),
                Err(err) => {
                    warn!(key = %key, error = %err, "rejected setting");
                    report.rejected.push((key, err));
                }
            }
        }
        Ok(report)
    }

    /// Apply a settings document from raw JSON bytes.
    pub fn apply_json_bytes(&self, payload: &[u8]) -> Result<ApplyReport> {
        let document: Value = serde_json::from_slice(payload)?;
        self.apply_json(&document)
    }

    /// Restore the compiled default.
    pub fn reset(&self, setting: Setting) {
        self.store(setting, SettingValue::from(setting.spec().default));
    }

    /// Every setting with its current value, in declaration order.
    pub fn snapshot(&self) -> Vec<(Setting, SettingValue)> {
        self.values
            .read()
            .iter()
            .map(|(setting, value)| (*setting, value.clone()))
            .collect()
    }

    fn store(&self, setting: Setting, value: SettingValue) {
        let previous = self.values.write().insert(setting, value.clone());
        if previous.as_ref() == Some(&value) {
            return;
        }
        debug!(key = %setting, value = %value, "setting changed");

        let observers = self.observers.read().clone();
        for observer in observers {
            observer(setting, &value);
        }
    }
}

impl Default for SettingsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsProvider for SettingsRegistry {
    fn get(&self, setting: Setting) -> Option<SettingValue> {
        self.values.read().get(&setting).cloned()
    }

    fn subscribe(&self, observer: SettingObserver) {
        self.observers.write().push(observer);
    }
}

fn build_setter(setting: Setting) -> Setter {
    let spec = setting.spec();
    Box::new(move |value: SettingValue| {
        let found = value.to_string();
        let value = value
            .coerce(spec.kind)
            .ok_or_else(|| SettingsError::KindMismatch {
                key: setting.key(),
                expected: spec.kind,
                found: found.clone(),
            })?;

        if satisfies(&spec.constraint, &value) {
            Ok(value)
        } else {
            Err(SettingsError::OutOfRange {
                key: setting.key(),
                value: found,
                constraint: spec.constraint.to_string(),
            })
        }
    })
}

fn satisfies(constraint: &Constraint, value: &SettingValue) -> bool {
    match (constraint, value) {
        (Constraint::Any, _) => true,
        (Constraint::NonEmpty, SettingValue::Text(text)) => !text.trim().is_empty(),
        (Constraint::Between { min, max }, SettingValue::Number(n)) => *min <= *n && *n <= *max,
        (Constraint::Above(bound), SettingValue::Number(n)) => *n > *bound,
        (Constraint::Integer { min, max }, SettingValue::Number(n)) => {
            n.fract() == 0.0 && *n >= *min as f64 && *n <= *max as f64
        }
        (Constraint::OneOf(options), SettingValue::Text(text)) => {
            options.iter().any(|option| option.eq_ignore_ascii_case(text.trim()))
        }
        _ => false,
    }
}
