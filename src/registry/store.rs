//! Device registry backed by the device cache

use super::cache::{CacheContents, DeviceCache};
use crate::discovery::DiscoveryEvent;
use std::collections::HashMap;
use suitestream_shared::{DeviceAddress, DeviceRecord};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Tracks known devices by identity
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, DeviceAddress>>,
    /// `None` keeps the registry memory-only
    cache: Option<DeviceCache>,
}

impl DeviceRegistry {
    /// Create a registry seeded from the cache
    pub async fn load(cache: DeviceCache) -> Self {
        let devices = cache.load().await.into_iter().collect();
        Self {
            devices: RwLock::new(devices),
            cache: Some(cache),
        }
    }

    /// Create an empty registry that never touches disk
    pub fn in_memory() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            cache: None,
        }
    }

    /// Insert or overwrite a device; returns whether anything changed
    pub async fn upsert(&self, identity: &str, host: &str, port: u16) -> bool {
        let address = DeviceAddress {
            host: host.to_string(),
            port,
        };

        let mut devices = self.devices.write().await;
        if devices.get(identity) == Some(&address) {
            return false;
        }
        devices.insert(identity.to_string(), address);
        self.persist(&devices).await;
        true
    }

    /// Remove a device; returns whether it was present
    pub async fn remove(&self, identity: &str) -> bool {
        let mut devices = self.devices.write().await;
        if devices.remove(identity).is_none() {
            return false;
        }
        self.persist(&devices).await;
        true
    }

    /// All known identities, in no particular order
    pub async fn list(&self) -> Vec<String> {
        self.devices.read().await.keys().cloned().collect()
    }

    /// Look up a device
    pub async fn get(&self, identity: &str) -> Option<DeviceRecord> {
        self.devices
            .read()
            .await
            .get(identity)
            .map(|addr| DeviceRecord::new(identity, addr.host.clone(), addr.port))
    }

    pub async fn count(&self) -> usize {
        self.devices.read().await.len()
    }

    /// Apply a discovery event
    pub async fn apply(&self, event: &DiscoveryEvent) {
        match event {
            DiscoveryEvent::Announce {
                identity,
                host,
                port,
                name,
            } => {
                if self.upsert(identity, host, *port).await {
                    info!("[REGISTRY] Discovered {} ({}) at {}:{}", name, identity, host, port);
                }
            }
            DiscoveryEvent::Withdraw { identity, name } => {
                if self.remove(identity).await {
                    info!("[REGISTRY] Removed {} ({})", name, identity);
                }
            }
        }
    }

    /// Persist the full mapping; failures are logged, never propagated
    async fn persist(&self, devices: &HashMap<String, DeviceAddress>) {
        let Some(cache) = &self.cache else {
            return;
        };
        let snapshot: CacheContents = devices
            .iter()
            .map(|(id, addr)| (id.clone(), addr.clone()))
            .collect();
        if let Err(e) = cache.save(&snapshot).await {
            warn!(
                "[REGISTRY] Failed to persist cache {}: {}",
                cache.path().display(),
                e
            );
        }
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::in_memory()
    }
}
