//! Cast v2 device-control transport
//!
//! This module handles:
//! - TLS sessions to receivers on port 8009
//! - Framed message exchange with heartbeat and request correlation
//! - Launching receiver apps and driving media sessions

mod channel;
mod client;
mod tls;

pub use client::CastTransport;
