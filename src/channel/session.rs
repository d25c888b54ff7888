//! Command channel session: routes inbound commands and sends replies

use super::manager::{ChannelConfig, ChannelEvent, ChannelManager};
use crate::command::CommandRouter;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// How a channel session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The server rejected the credential
    AuthRejected { reason: String },
    /// The channel stopped for any other reason
    Closed,
}

/// A long-lived authenticated channel run on behalf of the agent
#[async_trait]
pub trait ChannelSession: Send + Sync {
    /// Run the channel with `token` until it ends
    async fn run(&self, token: &str) -> SessionEnd;
}

/// Channel session that executes commands through the router
pub struct CommandSession {
    config: ChannelConfig,
    router: Arc<CommandRouter>,
}

impl CommandSession {
    pub fn new(config: ChannelConfig, router: Arc<CommandRouter>) -> Self {
        Self { config, router }
    }
}

#[async_trait]
impl ChannelSession for CommandSession {
    async fn run(&self, token: &str) -> SessionEnd {
        let mut manager = ChannelManager::open(self.config.clone(), token.to_string());
        let replies = manager.get_sender();

        while let Some(event) = manager.recv().await {
            match event {
                ChannelEvent::Connected { sid } => {
                    info!("[CHANNEL] Connected (sid {})", sid.as_deref().unwrap_or("-"));
                }
                ChannelEvent::Disconnected { reason } => {
                    warn!("[CHANNEL] Disconnected: {}; reconnecting", reason);
                }
                ChannelEvent::ConnectionFailed { reason } => {
                    warn!("[CHANNEL] Connection failed: {}", reason);
                }
                ChannelEvent::Command(command) => {
                    info!(
                        "[CHANNEL] Received command id={} type={}",
                        command.id, command.command_type
                    );
                    // Commands run concurrently; replies are correlated by id only
                    let router = self.router.clone();
                    let replies = replies.clone();
                    tokio::spawn(async move {
                        let reply = router.route(&command).await;
                        if replies.send(reply).await.is_err() {
                            warn!("[CHANNEL] Dropping reply for {}: channel closed", command.id);
                        }
                    });
                }
                ChannelEvent::AuthRejected { reason } => {
                    warn!("[CHANNEL] Credential rejected: {}", reason);
                    return SessionEnd::AuthRejected { reason };
                }
            }
        }

        SessionEnd::Closed
    }
}
