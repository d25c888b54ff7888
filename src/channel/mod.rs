//! Authenticated command channel to the control server
//!
//! This module handles:
//! - Socket.IO over WebSocket with reconnection and backoff
//! - Detecting credential rejection and stopping the channel
//! - Routing inbound commands concurrently and sending correlated replies

mod manager;
mod session;

pub use manager::ChannelConfig;
pub use session::{ChannelSession, CommandSession, SessionEnd};
