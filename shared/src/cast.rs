//! Cast v2 channel message
//!
//! Mirrors the `CastMessage` protobuf used by Cast receivers. Enum fields are
//! carried as plain varints since the protocol only defines value 0 for each.

use prost::Message;

/// Virtual connection management
pub const NS_CONNECTION: &str = "urn:x-cast:com.google.cast.tp.connection";
/// Keepalive PING/PONG
pub const NS_HEARTBEAT: &str = "urn:x-cast:com.google.cast.tp.heartbeat";
/// Platform receiver (apps, volume)
pub const NS_RECEIVER: &str = "urn:x-cast:com.google.cast.receiver";
/// Media session control
pub const NS_MEDIA: &str = "urn:x-cast:com.google.cast.media";

/// Default sender id used by the agent
pub const SENDER_ID: &str = "sender-0";
/// Platform receiver id
pub const RECEIVER_ID: &str = "receiver-0";

/// App id of the Default Media Receiver
pub const DEFAULT_MEDIA_RECEIVER_APP_ID: &str = "CC1AD845";
/// App id of the YouTube receiver
pub const YOUTUBE_APP_ID: &str = "233637DE";

/// `CASTV2_1_0`
pub const PROTOCOL_VERSION_CASTV2_1_0: i32 = 0;
/// `STRING` payload
pub const PAYLOAD_TYPE_STRING: i32 = 0;
/// `BINARY` payload
pub const PAYLOAD_TYPE_BINARY: i32 = 1;

#[derive(Clone, PartialEq, Message)]
pub struct CastMessage {
    #[prost(int32, required, tag = "1")]
    pub protocol_version: i32,

    #[prost(string, required, tag = "2")]
    pub source_id: String,

    #[prost(string, required, tag = "3")]
    pub destination_id: String,

    #[prost(string, required, tag = "4")]
    pub namespace: String,

    #[prost(int32, required, tag = "5")]
    pub payload_type: i32,

    #[prost(string, optional, tag = "6")]
    pub payload_utf8: Option<String>,

    #[prost(bytes = "vec", optional, tag = "7")]
    pub payload_binary: Option<Vec<u8>>,
}

impl CastMessage {
    /// Create a JSON (string payload) message
    pub fn json(
        source_id: impl Into<String>,
        destination_id: impl Into<String>,
        namespace: impl Into<String>,
        payload: &serde_json::Value,
    ) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION_CASTV2_1_0,
            source_id: source_id.into(),
            destination_id: destination_id.into(),
            namespace: namespace.into(),
            payload_type: PAYLOAD_TYPE_STRING,
            payload_utf8: Some(payload.to_string()),
            payload_binary: None,
        }
    }

    /// Parse the string payload as JSON, if present and well-formed
    pub fn json_payload(&self) -> Option<serde_json::Value> {
        if self.payload_type != PAYLOAD_TYPE_STRING {
            return None;
        }
        self.payload_utf8
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
    }
}
