//! JSON Schema checks for JSON-routed payloads.
//!
//! Enabled by the `schema` feature. A payload that fails its schema counts as
//! a decode failure and the single message is dropped.

use std::collections::HashMap;

use hmdlink_frame::MessageType;
use jsonschema::Validator;
use serde_json::Value;

use crate::error::{LinkError, Result};

const CONTROL_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["command"],
  "properties": {
    "command": {
      "enum": ["reset_orientation", "start_gaze_calibration", "stop_gaze_calibration",
               "set_angular_tracking", "ping"]
    },
    "enabled": { "type": "boolean" }
  }
}"#;

const CONFIG_SCHEMA: &str = r#"{
  "type": "object",
  "oneOf": [
    {
      "required": ["key", "value"],
      "properties": {
        "key": { "type": "string", "pattern": "^[a-z_]+\\.[a-z_]+$" },
        "value": { "type": ["number", "string", "boolean"] }
      }
    },
    {
      "required": ["settings"],
      "properties": {
        "settings": {
          "type": "object",
          "additionalProperties": { "type": ["number", "string", "boolean"] }
        }
      }
    }
  ]
}"#;

const LOG_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["level", "message"],
  "properties": {
    "level": { "type": "string" },
    "message": { "type": "string" },
    "source": { "type": "string" }
  }
}"#;

const GAZE_CALIBRATION_SCHEMA: &str = r##"{
  "type": "object",
  "required": ["reference", "angle_fit", "distance_fit"],
  "$defs": {
    "vec2": { "type": "array", "items": { "type": "number" }, "minItems": 2, "maxItems": 2 },
    "coefficients": { "type": "array", "items": { "type": "number" }, "minItems": 1 },
    "axes": {
      "type": "object",
      "required": ["yaw", "pitch"],
      "properties": {
        "yaw": { "$ref": "#/$defs/coefficients" },
        "pitch": { "$ref": "#/$defs/coefficients" }
      }
    }
  },
  "properties": {
    "reference": {
      "type": "object",
      "required": ["left", "right"],
      "properties": {
        "left": { "$ref": "#/$defs/vec2" },
        "right": { "$ref": "#/$defs/vec2" }
      }
    },
    "angle_fit": {
      "type": "object",
      "required": ["left", "right"],
      "properties": {
        "left": { "$ref": "#/$defs/axes" },
        "right": { "$ref": "#/$defs/axes" }
      }
    },
    "distance_fit": {
      "type": "object",
      "required": ["a", "b"],
      "properties": {
        "a": { "type": "number" },
        "b": { "type": "number" }
      }
    }
  }
}"##;

/// Message-type keyed registry of compiled validators.
pub struct PayloadSchemas {
    validators: HashMap<MessageType, Validator>,
}

impl PayloadSchemas {
    /// Empty registry: every payload passes.
    pub fn empty() -> Self {
        Self {
            validators: HashMap::new(),
        }
    }

    /// Schemas for the built-in JSON messages.
    pub fn builtin() -> Result<Self> {
        let mut schemas = Self::empty();
        schemas.register(MessageType::Control, CONTROL_SCHEMA)?;
        schemas.register(MessageType::Config, CONFIG_SCHEMA)?;
        schemas.register(MessageType::Log, LOG_SCHEMA)?;
        schemas.register(MessageType::GazeCalibration, GAZE_CALIBRATION_SCHEMA)?;
        Ok(schemas)
    }

    /// Register a schema from a JSON string, replacing any previous one.
    pub fn register(&mut self, message_type: MessageType, schema_json: &str) -> Result<()> {
        let schema: Value = serde_json::from_str(schema_json)?;
        let compiled = jsonschema::validator_for(&schema).map_err(|err| {
            LinkError::InvalidConfig(format!("schema for {message_type}: {err}"))
        })?;
        self.validators.insert(message_type, compiled);
        Ok(())
    }

    /// Validate a decoded payload. Types without a schema pass.
    pub fn validate(&self, message_type: MessageType, value: &Value) -> Result<()> {
        let Some(validator) = self.validators.get(&message_type) else {
            return Ok(());
        };

        let mut errors = validator.iter_errors(value);
        if let Some(first) = errors.next() {
            let mut message = first.to_string();
            for err in errors.take(3) {
                message.push_str("; ");
                message.push_str(&err.to_string());
            }
            return Err(LinkError::Schema {
                message_type,
                message,
            });
        }
        Ok(())
    }

    pub fn has_schema(&self, message_type: MessageType) -> bool {
        self.validators.contains_key(&message_type)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn builtin_schemas_compile() {
        let schemas = PayloadSchemas::builtin().unwrap();
        for ty in [
            MessageType::Control,
            MessageType::Config,
            MessageType::Log,
            MessageType::GazeCalibration,
        ] {
            assert!(schemas.has_schema(ty));
        }
        assert!(!schemas.has_schema(MessageType::Imu));
    }

    #[test]
    fn config_documents() {
        let schemas = PayloadSchemas::builtin().unwrap();
        assert!(schemas
            .validate(MessageType::Config, &json!({"key": "imu.beta_still", "value": 0.2}))
            .is_ok());
        assert!(schemas
            .validate(MessageType::Config, &json!({"settings": {"gaze.angular_tracking": true}}))
            .is_ok());
        assert!(schemas
            .validate(MessageType::Config, &json!({"key": "imu.beta_still"}))
            .is_err());
    }

    #[test]
    fn calibration_requires_pairs() {
        let schemas = PayloadSchemas::builtin().unwrap();
        let valid = json!({
            "reference": {"left": [0.0, 0.0], "right": [0.0, 0.0]},
            "angle_fit": {
                "left": {"yaw": [1.0, 0.0], "pitch": [1.0, 0.0]},
                "right": {"yaw": [1.0, 0.0], "pitch": [1.0, 0.0]}
            },
            "distance_fit": {"a": 1.0, "b": 0.0}
        });
        assert!(schemas.validate(MessageType::GazeCalibration, &valid).is_ok());

        let mut invalid = valid.clone();
        invalid["reference"]["left"] = json!([0.0]);
        let err = schemas
            .validate(MessageType::GazeCalibration, &invalid)
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::Schema {
                message_type: MessageType::GazeCalibration,
                ..
            }
        ));
    }

    #[test]
    fn unregistered_types_pass() {
        let schemas = PayloadSchemas::empty();
        assert!(schemas.validate(MessageType::Log, &json!(42)).is_ok());
    }
}
