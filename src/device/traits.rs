//! Trait abstraction for pluggable device-control backends

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by device operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Unknown device UID: {0}")]
    UnknownDevice(String),

    #[error("No active client for UID {0}")]
    NoActiveConnection(String),

    #[error("Connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("Launch failed: {0}")]
    Launch(String),

    /// Error reported by the device itself
    #[error("{0}")]
    Device(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Receiver volume as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VolumeStatus {
    #[serde(default)]
    pub level: f64,
    #[serde(default)]
    pub muted: bool,
}

/// Device status snapshot
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub volume: VolumeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_media_commands: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
}

/// Volume change request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VolumeChange {
    Level(f64),
    Muted(bool),
}

/// Media to load into the default receiver
#[derive(Debug, Clone, PartialEq)]
pub struct MediaLoad {
    pub url: String,
    pub content_type: String,
    pub title: String,
    pub thumbnail: String,
}

/// Media queue operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Load,
    Insert,
    Remove,
    Reorder,
    Update,
}

impl QueueKind {
    /// Media namespace message type
    pub fn message_type(&self) -> &'static str {
        match self {
            QueueKind::Load => "QUEUE_LOAD",
            QueueKind::Insert => "QUEUE_INSERT",
            QueueKind::Remove => "QUEUE_REMOVE",
            QueueKind::Reorder => "QUEUE_REORDER",
            QueueKind::Update => "QUEUE_UPDATE",
        }
    }

    /// Key carrying the item list in the request
    pub fn items_key(&self) -> &'static str {
        match self {
            QueueKind::Remove | QueueKind::Reorder => "itemIds",
            _ => "items",
        }
    }
}

/// A queue operation: item list plus merged options
#[derive(Debug, Clone, PartialEq)]
pub struct QueueOperation {
    pub kind: QueueKind,
    pub items: Value,
    pub options: Map<String, Value>,
}

/// An open control session with one device
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Launch the default media receiver and attach to it
    async fn launch_default_receiver(&self) -> Result<(), DeviceError>;

    async fn play(&self) -> Result<(), DeviceError>;
    async fn pause(&self) -> Result<(), DeviceError>;
    async fn stop(&self) -> Result<(), DeviceError>;
    async fn seek(&self, seconds: f64) -> Result<(), DeviceError>;
    async fn set_volume(&self, change: VolumeChange) -> Result<(), DeviceError>;
    async fn load_media(&self, media: &MediaLoad) -> Result<Value, DeviceError>;
    async fn get_status(&self) -> Result<DeviceStatus, DeviceError>;
    async fn launch_app(&self, app_id: &str) -> Result<(), DeviceError>;
    async fn queue(&self, operation: QueueOperation) -> Result<Value, DeviceError>;
    async fn set_active_tracks(&self, track_ids: Vec<Value>) -> Result<Value, DeviceError>;

    /// Resolves with the first transport-level error on this session
    async fn transport_error(&self) -> DeviceError;

    /// Close the session
    async fn close(&self);
}

/// Factory for device control sessions
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Connect to a device, returning a session on success
    async fn connect(&self, host: &str, port: u16) -> Result<Arc<dyn DeviceControl>, DeviceError>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
