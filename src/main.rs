mod agent;
mod cast;
mod channel;
mod command;
mod config;
mod device;
mod discovery;
mod onboarding;
mod pool;
mod registry;
mod status;

use agent::Agent;
use anyhow::{Context, Result};
use cast::CastTransport;
use channel::CommandSession;
use clap::Parser;
use command::{CommandRouter, LocalProcessExecutor};
use config::Args;
use discovery::AvahiBrowser;
use onboarding::{ReqwestOnboardingApi, TokenStore};
use pool::ConnectionPool;
use registry::{DeviceCache, DeviceRegistry};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is normal
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    info!("Device agent starting");
    info!("  Central server: {}", args.central_url);
    info!("  Device cache: {}", args.device_cache_path.display());

    let registry = Arc::new(DeviceRegistry::load(DeviceCache::new(&args.device_cache_path)).await);
    info!("[REGISTRY] {} cached devices", registry.count().await);

    if args.no_discovery {
        warn!("[DISCOVERY] Disabled; using cached devices only");
    } else {
        let (events_tx, events_rx) = mpsc::channel(64);
        AvahiBrowser::new(args.discovery_config()).spawn(events_tx);
        tokio::spawn(discovery::run_registry_feed(registry.clone(), events_rx));
    }

    let transport = CastTransport::new(args.device_connect_timeout())
        .context("setting up device transport")?;
    let pool = Arc::new(ConnectionPool::new(registry, Arc::new(transport)));
    let router = Arc::new(CommandRouter::new(pool, Arc::new(LocalProcessExecutor::new())));
    let channel_config = args.channel_config();
    let reconnect_delay = channel_config.reconnect_delay;
    let session = Arc::new(CommandSession::new(channel_config, router));

    let api = ReqwestOnboardingApi::new(&args.central_url, &args.connect_url())
        .context("building onboarding client")?;
    info!("[ONBOARD] Connect page: {}", api.connect_url());
    info!("[ONBOARD] Registration endpoint: {}", api.status_url());

    let agent = Agent::new(
        Arc::new(api),
        TokenStore::new(&args.token_path),
        session,
        args.retry_policy(),
    )
    .with_reconnect_delay(reconnect_delay);

    let status_addr = args.status_addr();
    let phase = agent.subscribe();
    tokio::spawn(async move {
        if let Err(e) = status::serve(status_addr, phase).await {
            error!("[STATUS] {:#}", e);
        }
    });

    agent.run().await
}
