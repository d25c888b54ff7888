//! Whole-file JSON device cache

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use suitestream_shared::DeviceAddress;
use tracing::{info, warn};

/// Cached mapping of identity -> address
pub type CacheContents = BTreeMap<String, DeviceAddress>;

/// On-disk device cache
#[derive(Debug, Clone)]
pub struct DeviceCache {
    path: PathBuf,
}

impl DeviceCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cache; a missing or corrupt file yields an empty map
    pub async fn load(&self) -> CacheContents {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("[REGISTRY] No cache found at {}, starting fresh", self.path.display());
                return CacheContents::new();
            }
            Err(e) => {
                warn!("[REGISTRY] Failed to read cache {}: {}", self.path.display(), e);
                return CacheContents::new();
            }
        };

        match serde_json::from_str::<CacheContents>(&data) {
            Ok(devices) => {
                info!("[REGISTRY] Loaded cache with {} devices", devices.len());
                devices
            }
            Err(e) => {
                warn!("[REGISTRY] Ignoring corrupt cache {}: {}", self.path.display(), e);
                CacheContents::new()
            }
        }
    }

    /// Write the whole mapping, replacing the previous file
    pub async fn save(&self, devices: &CacheContents) -> io::Result<()> {
        let json = serde_json::to_string_pretty(devices)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Write next to the target and rename so readers never see a torn file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DeviceCache::new(dir.path().join("cast_devices.json"));
        assert!(cache.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cast_devices.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(DeviceCache::new(&path).load().await.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DeviceCache::new(dir.path().join("nested").join("cast_devices.json"));

        let mut devices = CacheContents::new();
        devices.insert(
            "abc".into(),
            DeviceAddress {
                host: "192.168.1.20".into(),
                port: 8009,
            },
        );
        cache.save(&devices).await.unwrap();

        assert_eq!(cache.load().await, devices);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(cache.path()).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({"abc": {"host": "192.168.1.20", "port": 8009}})
        );
    }
}
