//! Device discovery
//!
//! Discovery runs `avahi-browse` as a child process and turns its parsable
//! output into announce/withdraw events. A single feed task applies events to
//! the registry in delivery order.

mod avahi;

pub use avahi::{AvahiBrowser, DiscoveryConfig};

use crate::registry::DeviceRegistry;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Events emitted by a discovery backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A device advertised itself (or changed address)
    Announce {
        identity: String,
        host: String,
        port: u16,
        name: String,
    },
    /// A device went away
    Withdraw { identity: String, name: String },
}

/// Apply discovery events to the registry until the feed closes
pub async fn run_registry_feed(
    registry: Arc<DeviceRegistry>,
    mut events: mpsc::Receiver<DiscoveryEvent>,
) {
    while let Some(event) = events.recv().await {
        registry.apply(&event).await;
    }
    info!("[DISCOVERY] Event feed closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_feed_applies_events_in_order() {
        let registry = Arc::new(DeviceRegistry::in_memory());
        let (tx, rx) = mpsc::channel(8);

        tx.send(DiscoveryEvent::Announce {
            identity: "abc".into(),
            host: "10.0.0.1".into(),
            port: 8009,
            name: "Kitchen".into(),
        })
        .await
        .unwrap();
        tx.send(DiscoveryEvent::Announce {
            identity: "abc".into(),
            host: "10.0.0.9".into(),
            port: 8009,
            name: "Kitchen".into(),
        })
        .await
        .unwrap();
        drop(tx);

        run_registry_feed(registry.clone(), rx).await;
        assert_eq!(registry.get("abc").await.unwrap().host, "10.0.0.9");
    }
}
