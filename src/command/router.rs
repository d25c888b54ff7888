//! Command router - dispatches inbound commands and builds result envelopes

use super::handlers::{self, HandlerContext, HandlerError, HandlerResult};
use super::process::ProcessRunner;
use crate::pool::ConnectionPool;
use serde_json::{json, Value};
use std::sync::Arc;
use suitestream_shared::{now_ms, CommandEnvelope, ResultEnvelope, CAST_NAMESPACE};
use tracing::{debug, info, warn};

/// Result of command execution
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    /// Command completed successfully
    Completed { result: Option<Value> },
    /// Command was dispatched but the device or process failed
    Failed { message: String },
    /// Command was not dispatched (unknown verb, bad arguments)
    Rejected { message: String },
}

impl From<HandlerResult> for CommandResult {
    fn from(result: HandlerResult) -> Self {
        match result {
            Ok(value) => CommandResult::Completed {
                result: Some(value),
            },
            Err(HandlerError::Device(e)) => CommandResult::Failed {
                message: e.to_string(),
            },
            Err(e) => CommandResult::Rejected {
                message: e.to_string(),
            },
        }
    }
}

/// Routes commands to device handlers or local processes
///
/// `cast:` verbs go to the connection pool. Anything else is spawned as a
/// local binary with the command's arguments; no allow-list is applied, so
/// the channel must be trusted.
pub struct CommandRouter {
    pool: Arc<ConnectionPool>,
    runner: Arc<dyn ProcessRunner>,
}

impl CommandRouter {
    pub fn new(pool: Arc<ConnectionPool>, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { pool, runner }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Execute a command and return the result envelope correlated by id
    pub async fn route(&self, command: &CommandEnvelope) -> ResultEnvelope {
        let start_time = now_ms();
        info!(
            "[ROUTER] Executing command: id={} type={}",
            command.id, command.command_type
        );

        let result = self.execute(command).await;
        let elapsed = now_ms().saturating_sub(start_time);

        match result {
            CommandResult::Completed { result } => {
                info!("[ROUTER] Command {} completed in {}ms", command.id, elapsed);
                ResultEnvelope::ok(command.id.clone(), result)
            }
            CommandResult::Failed { message } => {
                warn!("[ROUTER] Command {} failed: {}", command.id, message);
                ResultEnvelope::error(command.id.clone(), message)
            }
            CommandResult::Rejected { message } => {
                warn!("[ROUTER] Command {} rejected: {}", command.id, message);
                ResultEnvelope::error(command.id.clone(), message)
            }
        }
    }

    /// Dispatch a command without building the envelope
    pub async fn execute(&self, command: &CommandEnvelope) -> CommandResult {
        if command.command_type.trim().is_empty() {
            return CommandResult::Rejected {
                message: "Missing command type".into(),
            };
        }

        match command.namespace() {
            Some((CAST_NAMESPACE, verb)) => self.dispatch_cast(verb, command).await,
            _ => self.run_local(command).await,
        }
    }

    async fn dispatch_cast(&self, verb: &str, command: &CommandEnvelope) -> CommandResult {
        let ctx = HandlerContext {
            pool: self.pool.clone(),
            target: command.target_device_id.clone(),
            args: command.args.clone(),
        };
        debug!("[ROUTER] cast verb {} for {:?}", verb, ctx.target);

        let result = match verb {
            "play" => handlers::handle_play(&ctx).await,
            "pause" => handlers::handle_pause(&ctx).await,
            "stop" => handlers::handle_stop(&ctx).await,
            "seek" => handlers::handle_seek(&ctx).await,
            "setVolume" => handlers::handle_set_volume(&ctx).await,
            "volumeUp" => handlers::handle_volume_up(&ctx).await,
            "volumeDown" => handlers::handle_volume_down(&ctx).await,
            "mute" => handlers::handle_mute(&ctx).await,
            "unmute" => handlers::handle_unmute(&ctx).await,
            "loadMedia" => handlers::handle_load_media(&ctx).await,
            "getStatus" => handlers::handle_get_status(&ctx).await,
            "launchApp" => handlers::handle_launch_app(&ctx).await,
            "launchYouTube" => handlers::handle_launch_youtube(&ctx).await,
            "ping" => handlers::handle_ping(&ctx).await,
            "discoverCapabilities" => handlers::handle_discover_capabilities(&ctx).await,
            "queueLoad" => handlers::handle_queue_load(&ctx).await,
            "queueInsert" => handlers::handle_queue_insert(&ctx).await,
            "queueRemove" => handlers::handle_queue_remove(&ctx).await,
            "queueReorder" => handlers::handle_queue_reorder(&ctx).await,
            "queueUpdate" => handlers::handle_queue_update(&ctx).await,
            "setTracks" | "setActiveTracks" => handlers::handle_set_tracks(&ctx).await,
            "listDevices" => handlers::handle_list_devices(&ctx).await,
            "disconnect" => handlers::handle_disconnect(&ctx).await,
            _ => {
                return CommandResult::Rejected {
                    message: format!("Unknown cast command: {}", verb),
                }
            }
        };

        result.into()
    }

    async fn run_local(&self, command: &CommandEnvelope) -> CommandResult {
        let args: Vec<String> = command.args.iter().map(arg_to_string).collect();

        match self.runner.run(&command.command_type, &args).await {
            Ok(stdout) => {
                debug!("[EXEC] {} stdout: {}", command.command_type, stdout.trim_end());
                CommandResult::Completed {
                    result: Some(json!(stdout)),
                }
            }
            Err(e) => CommandResult::Failed {
                message: e.to_string(),
            },
        }
    }
}

/// Process arguments are passed verbatim; non-strings use their JSON text
fn arg_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
