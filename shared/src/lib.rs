//! Suitestream shared wire types
//!
//! This crate provides the envelope types exchanged with the control server,
//! the Cast v2 frame codec, the Socket.IO packet codec and the pure onboarding
//! state machine used by the device agent.

pub mod cast;
pub mod codec;
pub mod socketio;
pub mod state_machine;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timing parameters for the agent
pub mod timing {
    /// Delay between verification code page fetch attempts
    pub const CODE_RETRY_MS: u64 = 2000;

    /// Interval between registration status polls
    pub const POLL_INTERVAL_MS: u64 = 3000;

    /// Cast heartbeat PING interval
    pub const CAST_HEARTBEAT_INTERVAL_MS: u64 = 5000;

    /// How long a Cast request waits for its correlated response
    pub const CAST_REQUEST_TIMEOUT_MS: u64 = 10000;

    /// Initial command channel reconnect delay
    pub const CHANNEL_RECONNECT_MS: u64 = 1000;

    /// Upper bound for the command channel reconnect delay
    pub const CHANNEL_MAX_RECONNECT_MS: u64 = 30000;
}

/// Namespace prefix for device-control verbs
pub const CAST_NAMESPACE: &str = "cast";

/// Command received from the control server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    /// Opaque correlation token, echoed back in the result
    #[serde(default)]
    pub id: Value,
    /// Verb, optionally namespaced (`cast:play`)
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_device_id: Option<String>,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl CommandEnvelope {
    /// Create a command envelope
    pub fn new(id: impl Into<Value>, command_type: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            command_type: command_type.into(),
            target_device_id: None,
            args,
        }
    }

    /// Set the target device
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_device_id = Some(target.into());
        self
    }

    /// Split `namespace:verb` into its parts, if namespaced
    pub fn namespace(&self) -> Option<(&str, &str)> {
        self.command_type.split_once(':')
    }
}

/// Outcome of a routed command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Ok,
    Error,
}

/// Reply sent back to the control server, correlated by `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub id: Value,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultEnvelope {
    /// Create a successful result
    pub fn ok(id: Value, result: Option<Value>) -> Self {
        Self {
            id,
            status: ResultStatus::Ok,
            result,
            error: None,
        }
    }

    /// Create a failed result
    pub fn error(id: Value, message: impl Into<String>) -> Self {
        Self {
            id,
            status: ResultStatus::Error,
            result: None,
            error: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResultStatus::Ok
    }
}

/// Network address of a discovered device, as stored in the device cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAddress {
    pub host: String,
    pub port: u16,
}

/// A known device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub identity: String,
    pub host: String,
    pub port: u16,
}

impl DeviceRecord {
    pub fn new(identity: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            identity: identity.into(),
            host: host.into(),
            port,
        }
    }

    pub fn address(&self) -> DeviceAddress {
        DeviceAddress {
            host: self.host.clone(),
            port: self.port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_envelope_parse() {
        let cmd: CommandEnvelope = serde_json::from_value(json!({
            "id": "abc-1",
            "type": "cast:play",
            "targetDeviceId": "X",
            "args": []
        }))
        .unwrap();
        assert_eq!(cmd.id, json!("abc-1"));
        assert_eq!(cmd.namespace(), Some(("cast", "play")));
        assert_eq!(cmd.target_device_id.as_deref(), Some("X"));
    }

    #[test]
    fn test_command_envelope_defaults() {
        let cmd: CommandEnvelope =
            serde_json::from_value(json!({ "id": 7, "type": "adb" })).unwrap();
        assert!(cmd.args.is_empty());
        assert!(cmd.target_device_id.is_none());
        assert_eq!(cmd.namespace(), None);
    }

    #[test]
    fn test_result_envelope_serialization() {
        let ok = ResultEnvelope::ok(json!(7), Some(json!("playing")));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({ "id": 7, "status": "ok", "result": "playing" })
        );

        let err = ResultEnvelope::error(json!("x"), "Unknown device UID: y");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({ "id": "x", "status": "error", "error": "Unknown device UID: y" })
        );
        assert!(!err.is_ok());
    }
}
