use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::format::Message;

/// CONTROL message payload sent to the perception unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Re-zero the head orientation.
    ResetOrientation,
    /// Begin collecting gaze calibration samples.
    StartGazeCalibration,
    /// Finish calibration; the peer answers with a `GazeCalibration` model.
    StopGazeCalibration,
    /// Raycast along the gaze instead of straight ahead.
    SetAngularTracking { enabled: bool },
    /// Liveness probe.
    Ping,
}

impl ControlCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ResetOrientation => "reset_orientation",
            Self::StartGazeCalibration => "start_gaze_calibration",
            Self::StopGazeCalibration => "stop_gaze_calibration",
            Self::SetAngularTracking { .. } => "set_angular_tracking",
            Self::Ping => "ping",
        }
    }

    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_message(&self) -> Result<Message> {
        self.to_json().map(Message::Json)
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        Ok(Self::deserialize(value)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn wire_shape() {
        assert_eq!(
            ControlCommand::ResetOrientation.to_json().unwrap(),
            json!({"command": "reset_orientation"})
        );
        assert_eq!(
            ControlCommand::SetAngularTracking { enabled: false }
                .to_json()
                .unwrap(),
            json!({"command": "set_angular_tracking", "enabled": false})
        );
    }

    #[test]
    fn parse_commands() {
        let parsed = ControlCommand::from_json(&json!({"command": "ping"})).unwrap();
        assert_eq!(parsed, ControlCommand::Ping);
        assert_eq!(parsed.name(), "ping");
        assert!(ControlCommand::from_json(&json!({"command": "reboot"})).is_err());
        assert!(ControlCommand::from_json(&json!({"command": "set_angular_tracking"})).is_err());
    }
}
