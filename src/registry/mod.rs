//! Device registry
//!
//! This module handles:
//! - The in-memory map of device identity to network address
//! - Loading and persisting the on-disk device cache
//! - Applying discovery announce/withdraw events

mod cache;
mod store;

pub use cache::DeviceCache;
pub use store::DeviceRegistry;
