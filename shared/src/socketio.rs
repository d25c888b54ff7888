//! Engine.IO v4 / Socket.IO v5 text packet codec
//!
//! Only the text subset used over a WebSocket transport is supported:
//! ```text
//! 0{"sid":..,"pingInterval":..}   engine open
//! 2 / 3                           engine ping / pong
//! 40{"deviceJwt":".."}            socket connect (with auth payload)
//! 44{"message":".."}              socket connect error
//! 42["event",{..}]                socket event
//! ```

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Errors raised while decoding packets
#[derive(Error, Debug)]
pub enum SocketIoError {
    #[error("Empty packet")]
    Empty,

    #[error("Unknown packet type: {0:?}")]
    UnknownPacketType(char),

    #[error("Invalid packet payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid event packet: {0}")]
    InvalidEvent(String),

    #[error("Unsupported packet: {0}")]
    Unsupported(String),
}

/// Handshake data carried by the engine `open` packet
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25000
}

fn default_ping_timeout() -> u64 {
    20000
}

/// Engine.IO transport packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    /// Socket.IO payload (everything after the leading `4`)
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    /// Decode a WebSocket text frame
    pub fn decode(text: &str) -> Result<Self, SocketIoError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(SocketIoError::Empty)?;
        let rest = chars.as_str();

        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(rest)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping),
            '3' => Ok(EnginePacket::Pong),
            '4' => Ok(EnginePacket::Message(rest.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(SocketIoError::UnknownPacketType(other)),
        }
    }

    /// Encode into a WebSocket text frame
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(info) => format!(
                "0{{\"sid\":{},\"pingInterval\":{},\"pingTimeout\":{}}}",
                Value::String(info.sid.clone()),
                info.ping_interval,
                info.ping_timeout
            ),
            EnginePacket::Close => "1".into(),
            EnginePacket::Ping => "2".into(),
            EnginePacket::Pong => "3".into(),
            EnginePacket::Message(payload) => format!("4{}", payload),
            EnginePacket::Upgrade => "5".into(),
            EnginePacket::Noop => "6".into(),
        }
    }
}

/// Socket.IO packet on the default namespace
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event {
        name: String,
        data: Vec<Value>,
        ack_id: Option<u64>,
    },
    Ack {
        ack_id: u64,
        data: Vec<Value>,
    },
    ConnectError(Value),
}

impl SocketPacket {
    /// Create an event packet
    pub fn event(name: impl Into<String>, data: Value) -> Self {
        SocketPacket::Event {
            name: name.into(),
            data: vec![data],
            ack_id: None,
        }
    }

    /// Decode the payload of an engine `message` packet
    pub fn decode(payload: &str) -> Result<Self, SocketIoError> {
        let mut chars = payload.chars();
        let kind = chars.next().ok_or(SocketIoError::Empty)?;
        let mut rest = chars.as_str();

        // Optional namespace ("/admin,"); the agent only uses "/"
        if rest.starts_with('/') {
            rest = match rest.find(',') {
                Some(idx) => &rest[idx + 1..],
                None => "",
            };
        }

        // Optional ack id
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let ack_id = if digits > 0 {
            rest[..digits].parse::<u64>().ok()
        } else {
            None
        };
        let body = &rest[digits..];

        match kind {
            '0' => {
                let data = if body.is_empty() {
                    None
                } else {
                    Some(serde_json::from_str(body)?)
                };
                Ok(SocketPacket::Connect(data))
            }
            '1' => Ok(SocketPacket::Disconnect),
            '2' => {
                let mut items: Vec<Value> = serde_json::from_str(body)?;
                if items.is_empty() {
                    return Err(SocketIoError::InvalidEvent("missing event name".into()));
                }
                let name = match items.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(SocketIoError::InvalidEvent(format!(
                            "event name must be a string, got {}",
                            other
                        )))
                    }
                };
                Ok(SocketPacket::Event {
                    name,
                    data: items,
                    ack_id,
                })
            }
            '3' => {
                let ack_id =
                    ack_id.ok_or_else(|| SocketIoError::InvalidEvent("ack without id".into()))?;
                Ok(SocketPacket::Ack {
                    ack_id,
                    data: serde_json::from_str(body)?,
                })
            }
            '4' => {
                let data = if body.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(body)?
                };
                Ok(SocketPacket::ConnectError(data))
            }
            '5' | '6' => Err(SocketIoError::Unsupported("binary packets".into())),
            other => Err(SocketIoError::UnknownPacketType(other)),
        }
    }

    /// Encode as an engine `message` payload (without the leading `4`)
    pub fn encode(&self) -> String {
        match self {
            SocketPacket::Connect(None) => "0".into(),
            SocketPacket::Connect(Some(data)) => format!("0{}", data),
            SocketPacket::Disconnect => "1".into(),
            SocketPacket::Event { name, data, ack_id } => {
                let mut items = Vec::with_capacity(data.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(data.iter().cloned());
                let ack = ack_id.map(|id| id.to_string()).unwrap_or_default();
                format!("2{}{}", ack, Value::Array(items))
            }
            SocketPacket::Ack { ack_id, data } => {
                format!("3{}{}", ack_id, Value::Array(data.clone()))
            }
            SocketPacket::ConnectError(data) => format!("4{}", data),
        }
    }

    /// Encode as a full WebSocket text frame
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }

    /// Human-readable message of a connect error
    pub fn error_message(&self) -> Option<String> {
        match self {
            SocketPacket::ConnectError(Value::String(s)) => Some(s.clone()),
            SocketPacket::ConnectError(Value::Object(map)) => Some(
                map.get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("connect error")
                    .to_string(),
            ),
            SocketPacket::ConnectError(_) => Some("connect error".into()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open() {
        let packet = EnginePacket::decode(
            r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap();
        assert_eq!(
            packet,
            EnginePacket::Open(OpenInfo {
                sid: "abc".into(),
                ping_interval: 25000,
                ping_timeout: 20000,
            })
        );
    }

    #[test]
    fn test_ping_pong() {
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping);
        assert_eq!(EnginePacket::Pong.encode(), "3");
    }

    #[test]
    fn test_connect_with_auth() {
        let frame = SocketPacket::Connect(Some(json!({"deviceJwt": "t0k"}))).to_frame();
        assert_eq!(frame, r#"40{"deviceJwt":"t0k"}"#);
    }

    #[test]
    fn test_decode_device_command_event() {
        let engine = EnginePacket::decode(
            r#"42["device-command",{"id":"1","type":"adb","args":["devices"]}]"#,
        )
        .unwrap();
        let EnginePacket::Message(payload) = engine else {
            panic!("expected message packet");
        };
        match SocketPacket::decode(&payload).unwrap() {
            SocketPacket::Event { name, data, ack_id } => {
                assert_eq!(name, "device-command");
                assert_eq!(data, vec![json!({"id":"1","type":"adb","args":["devices"]})]);
                assert_eq!(ack_id, None);
            }
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_decode_event_with_namespace_and_ack() {
        let packet = SocketPacket::decode(r#"2/admin,12["ping"]"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Event {
                name: "ping".into(),
                data: vec![],
                ack_id: Some(12),
            }
        );
    }

    #[test]
    fn test_encode_reply_event() {
        let packet = SocketPacket::event("device-reply", json!({"id": "1", "status": "ok"}));
        assert_eq!(
            packet.to_frame(),
            r#"42["device-reply",{"id":"1","status":"ok"}]"#
        );
    }

    #[test]
    fn test_connect_error_message() {
        let packet = SocketPacket::decode(r#"4{"message":"Invalid token"}"#).unwrap();
        assert_eq!(packet.error_message().as_deref(), Some("Invalid token"));

        let legacy = SocketPacket::decode(r#"4"jwt expired""#).unwrap();
        assert_eq!(legacy.error_message().as_deref(), Some("jwt expired"));
    }

    #[test]
    fn test_rejects_unknown_packet() {
        assert!(matches!(
            EnginePacket::decode("9"),
            Err(SocketIoError::UnknownPacketType('9'))
        ));
        assert!(matches!(EnginePacket::decode(""), Err(SocketIoError::Empty)));
    }
}
