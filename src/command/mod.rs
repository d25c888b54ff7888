//! Command execution infrastructure for the agent
//!
//! This module handles:
//! - Routing inbound command envelopes by verb namespace
//! - Dispatching `cast:` verbs to device handlers
//! - Spawning local processes for everything else
//! - Building result envelopes correlated by command id

pub mod handlers;
mod process;
mod router;

pub use process::{LocalProcessExecutor, ProcessError, ProcessRunner};
pub use router::CommandRouter;
