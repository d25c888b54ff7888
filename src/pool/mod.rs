//! Device connection pool
//!
//! This module handles:
//! - Lazily creating one control session per device identity
//! - Reusing live sessions across commands
//! - Evicting sessions when their transport fails
//! - The device operations exposed to the command router

mod manager;
mod operations;
#[cfg(test)]
pub(crate) mod stub;

pub use manager::ConnectionPool;
pub use operations::DEFAULT_VOLUME_STEP;
