//! Command-line and environment configuration

use crate::channel::ChannelConfig;
use crate::discovery::DiscoveryConfig;
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use suitestream_shared::state_machine::RetryPolicy;
use suitestream_shared::timing;

const DEFAULT_CENTRAL_URL: &str = "http://soundscreen.soundcheckvn.com";

#[derive(Debug, Clone, Parser)]
#[command(name = "suitestream-agent", version, about = "Suitestream device agent")]
pub struct Args {
    /// Port of the local status page
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Base URL of the central server
    #[arg(long, env = "CENTRAL_URL", default_value = DEFAULT_CENTRAL_URL)]
    pub central_url: String,

    /// Connect page holding the verification code; defaults to <central>/connect
    #[arg(long, env = "CONNECT_URL")]
    pub connect_url: Option<String>,

    /// Delay between registration polls
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = timing::POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// Delay before retrying a failed code fetch
    #[arg(long, env = "CODE_RETRY_MS", default_value_t = timing::CODE_RETRY_MS)]
    pub code_retry_ms: u64,

    /// Device cache file
    #[arg(long, env = "DEVICE_CACHE_PATH", default_value = "/data/cast_devices.json")]
    pub device_cache_path: PathBuf,

    /// Persisted channel token
    #[arg(long, env = "TOKEN_PATH", default_value = "/data/device_token")]
    pub token_path: PathBuf,

    /// DNS-SD service type browsed for devices
    #[arg(long, env = "DISCOVERY_SERVICE", default_value = "_googlecast._tcp")]
    pub discovery_service: String,

    /// Rely on the device cache only
    #[arg(long, env = "NO_DISCOVERY")]
    pub no_discovery: bool,

    /// Timeout for device TCP connect and TLS handshake
    #[arg(long, env = "DEVICE_CONNECT_TIMEOUT_MS", default_value_t = 5000)]
    pub device_connect_timeout_ms: u64,
}

impl Args {
    /// Connect page URL, derived from the central URL when unset
    pub fn connect_url(&self) -> String {
        match self.connect_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => format!("{}/connect", self.central_url.trim_end_matches('/')),
        }
    }

    pub fn status_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            code_retry: Duration::from_millis(self.code_retry_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            central_url: self.central_url.clone(),
            ..Default::default()
        }
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            service_type: self.discovery_service.clone(),
            ..Default::default()
        }
    }

    pub fn device_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.device_connect_timeout_ms)
    }
}
