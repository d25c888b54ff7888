//! Handlers for `cast:` device verbs

mod device;
mod playback;
mod queue;
mod volume;

pub use device::{
    handle_disconnect, handle_discover_capabilities, handle_get_status, handle_launch_app,
    handle_launch_youtube, handle_list_devices, handle_ping,
};
pub use playback::{
    handle_load_media, handle_pause, handle_play, handle_seek, handle_set_tracks, handle_stop,
};
pub use queue::{
    handle_queue_insert, handle_queue_load, handle_queue_remove, handle_queue_reorder,
    handle_queue_update,
};
pub use volume::{
    handle_mute, handle_set_volume, handle_unmute, handle_volume_down, handle_volume_up,
};

use crate::device::DeviceError;
use crate::pool::ConnectionPool;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Why a handler did not produce a result
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Missing targetDeviceId")]
    MissingTarget,

    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("Invalid argument {name}: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

pub type HandlerResult = Result<Value, HandlerError>;

/// Context passed to command handlers
#[derive(Clone)]
pub struct HandlerContext {
    pub pool: Arc<ConnectionPool>,
    pub target: Option<String>,
    pub args: Vec<Value>,
}

impl HandlerContext {
    /// The device the command is addressed to
    pub fn target(&self) -> Result<&str, HandlerError> {
        self.target
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(HandlerError::MissingTarget)
    }

    fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index).filter(|v| !v.is_null())
    }

    /// Required string argument; numbers are accepted as their text form
    pub fn str_arg(&self, index: usize, name: &'static str) -> Result<String, HandlerError> {
        self.opt_str_arg(index)
            .ok_or(HandlerError::MissingArgument(name))
    }

    pub fn opt_str_arg(&self, index: usize) -> Option<String> {
        match self.arg(index)? {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Required numeric argument; numeric strings are accepted
    pub fn f64_arg(&self, index: usize, name: &'static str) -> Result<f64, HandlerError> {
        let value = self.arg(index).ok_or(HandlerError::MissingArgument(name))?;
        parse_f64(value).ok_or_else(|| HandlerError::InvalidArgument {
            name,
            reason: format!("expected a number, got {}", value),
        })
    }

    /// Optional numeric argument with a default
    pub fn f64_arg_or(&self, index: usize, name: &'static str, default: f64) -> Result<f64, HandlerError> {
        match self.arg(index) {
            Some(_) => self.f64_arg(index, name),
            None => Ok(default),
        }
    }

    /// A serialized JSON argument; already-structured values are re-serialized
    pub fn json_arg(&self, index: usize, name: &'static str) -> Result<String, HandlerError> {
        self.str_arg(index, name)
    }

    /// Optional serialized JSON argument, defaulting to `{}`
    pub fn json_arg_or_empty(&self, index: usize) -> String {
        self.opt_str_arg(index).unwrap_or_else(|| "{}".into())
    }

    /// Raw argument value, passed through untouched
    pub fn value_arg(&self, index: usize) -> Option<Value> {
        self.arg(index).cloned()
    }
}

fn parse_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}
