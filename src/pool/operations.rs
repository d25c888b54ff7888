//! Device verbs exposed through the pool
//!
//! Each verb resolves the live connection for the identity (connecting on
//! demand) and returns a JSON value suitable for a result envelope.

use super::ConnectionPool;
use crate::device::{DeviceError, MediaLoad, QueueKind, QueueOperation, VolumeChange};
use serde_json::{json, Map, Value};
use suitestream_shared::cast::YOUTUBE_APP_ID;
use tracing::debug;

/// Default relative volume step
pub const DEFAULT_VOLUME_STEP: f64 = 0.05;

/// Apply a signed step to a volume level, clamped to [0, 1]
pub fn step_volume(level: f64, step: f64) -> f64 {
    (level + step).clamp(0.0, 1.0)
}

impl ConnectionPool {
    pub async fn play(&self, identity: &str) -> Result<Value, DeviceError> {
        self.get_connection(identity).await?.play().await?;
        Ok(json!("playing"))
    }

    pub async fn pause(&self, identity: &str) -> Result<Value, DeviceError> {
        self.get_connection(identity).await?.pause().await?;
        Ok(json!("paused"))
    }

    pub async fn stop(&self, identity: &str) -> Result<Value, DeviceError> {
        self.get_connection(identity).await?.stop().await?;
        Ok(json!("stopped"))
    }

    pub async fn seek(&self, identity: &str, seconds: f64) -> Result<Value, DeviceError> {
        self.get_connection(identity).await?.seek(seconds).await?;
        Ok(json!(format!("seeked to {}", seconds)))
    }

    pub async fn set_volume(&self, identity: &str, level: f64) -> Result<Value, DeviceError> {
        if !(0.0..=1.0).contains(&level) {
            return Err(DeviceError::InvalidArgument(format!(
                "volume level {} outside [0, 1]",
                level
            )));
        }
        self.get_connection(identity)
            .await?
            .set_volume(VolumeChange::Level(level))
            .await?;
        Ok(json!(format!("volume set to {}", level)))
    }

    pub async fn volume_up(&self, identity: &str, step: f64) -> Result<Value, DeviceError> {
        let level = self.step_volume_by(identity, step.abs()).await?;
        Ok(json!(format!("volume up to {}", level)))
    }

    pub async fn volume_down(&self, identity: &str, step: f64) -> Result<Value, DeviceError> {
        let level = self.step_volume_by(identity, -step.abs()).await?;
        Ok(json!(format!("volume down to {}", level)))
    }

    /// Read the reported level, apply the step and write it back
    async fn step_volume_by(&self, identity: &str, step: f64) -> Result<f64, DeviceError> {
        let control = self.get_connection(identity).await?;
        let current = control.get_status().await?.volume.level;
        let level = step_volume(current, step);
        debug!("[POOL] {} volume {} -> {}", identity, current, level);
        control.set_volume(VolumeChange::Level(level)).await?;
        Ok(level)
    }

    pub async fn mute(&self, identity: &str) -> Result<Value, DeviceError> {
        self.get_connection(identity)
            .await?
            .set_volume(VolumeChange::Muted(true))
            .await?;
        Ok(json!("muted"))
    }

    pub async fn unmute(&self, identity: &str) -> Result<Value, DeviceError> {
        self.get_connection(identity)
            .await?
            .set_volume(VolumeChange::Muted(false))
            .await?;
        Ok(json!("unmuted"))
    }

    pub async fn load_media(&self, identity: &str, media: MediaLoad) -> Result<Value, DeviceError> {
        self.get_connection(identity).await?.load_media(&media).await?;
        Ok(json!(format!("loaded {}", media.url)))
    }

    pub async fn get_status(&self, identity: &str) -> Result<Value, DeviceError> {
        let status = self.get_connection(identity).await?.get_status().await?;
        serde_json::to_value(status).map_err(|e| DeviceError::Device(e.to_string()))
    }

    pub async fn launch_app(&self, identity: &str, app_id: &str) -> Result<Value, DeviceError> {
        self.get_connection(identity).await?.launch_app(app_id).await?;
        Ok(json!(format!("launched app {}", app_id)))
    }

    pub async fn launch_youtube(&self, identity: &str) -> Result<Value, DeviceError> {
        self.launch_app(identity, YOUTUBE_APP_ID).await
    }

    /// Connectivity check via a status round-trip
    pub async fn ping(&self, identity: &str) -> Result<Value, DeviceError> {
        self.get_connection(identity).await?.get_status().await?;
        Ok(json!("pong"))
    }

    pub async fn discover_capabilities(&self, identity: &str) -> Result<Value, DeviceError> {
        let status = self.get_connection(identity).await?.get_status().await?;
        Ok(json!({
            "supportedMediaCommands": status.supported_media_commands,
            "volume": status.volume,
            "playerState": status.player_state,
        }))
    }

    pub async fn queue_load(
        &self,
        identity: &str,
        items: &str,
        options: &str,
    ) -> Result<Value, DeviceError> {
        self.run_queue(identity, QueueKind::Load, items, options, None)
            .await
    }

    pub async fn queue_insert(
        &self,
        identity: &str,
        items: &str,
        insert_before: Option<Value>,
        options: &str,
    ) -> Result<Value, DeviceError> {
        self.run_queue(identity, QueueKind::Insert, items, options, insert_before)
            .await
    }

    pub async fn queue_remove(
        &self,
        identity: &str,
        item_ids: &str,
        options: &str,
    ) -> Result<Value, DeviceError> {
        self.run_queue(identity, QueueKind::Remove, item_ids, options, None)
            .await
    }

    pub async fn queue_reorder(
        &self,
        identity: &str,
        item_ids: &str,
        insert_before: Option<Value>,
        options: &str,
    ) -> Result<Value, DeviceError> {
        self.run_queue(identity, QueueKind::Reorder, item_ids, options, insert_before)
            .await
    }

    pub async fn queue_update(
        &self,
        identity: &str,
        items: &str,
        options: &str,
    ) -> Result<Value, DeviceError> {
        self.run_queue(identity, QueueKind::Update, items, options, None)
            .await
    }

    pub async fn set_tracks(&self, identity: &str, track_ids: &str) -> Result<Value, DeviceError> {
        let track_ids = match parse_json("trackIds", track_ids)? {
            Value::Array(ids) => ids,
            other => {
                return Err(DeviceError::InvalidArgument(format!(
                    "trackIds must be an array, got {}",
                    other
                )))
            }
        };
        self.get_connection(identity)
            .await?
            .set_active_tracks(track_ids)
            .await
    }

    /// Identities known to the registry
    pub async fn list_devices(&self) -> Value {
        let mut devices = self.registry().list().await;
        devices.sort();
        json!(devices)
    }

    async fn run_queue(
        &self,
        identity: &str,
        kind: QueueKind,
        items: &str,
        options: &str,
        insert_before: Option<Value>,
    ) -> Result<Value, DeviceError> {
        let operation = build_queue_operation(kind, items, options, insert_before)?;
        self.get_connection(identity).await?.queue(operation).await
    }
}

/// Parse the serialized item list and options, merging `insertBefore`
fn build_queue_operation(
    kind: QueueKind,
    items: &str,
    options: &str,
    insert_before: Option<Value>,
) -> Result<QueueOperation, DeviceError> {
    let items = parse_json(kind.items_key(), items)?;
    if !items.is_array() {
        return Err(DeviceError::InvalidArgument(format!(
            "{} must be an array",
            kind.items_key()
        )));
    }

    let mut options = match parse_json("options", options)? {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(DeviceError::InvalidArgument(format!(
                "options must be an object, got {}",
                other
            )))
        }
    };
    if let Some(before) = insert_before.filter(|v| !v.is_null()) {
        options.insert("insertBefore".into(), before);
    }

    Ok(QueueOperation {
        kind,
        items,
        options,
    })
}

fn parse_json(name: &str, raw: &str) -> Result<Value, DeviceError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(raw)
        .map_err(|e| DeviceError::InvalidArgument(format!("{} is not valid JSON: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::stub::StubTransport;
    use crate::registry::DeviceRegistry;
    use std::sync::Arc;

    async fn pool() -> (ConnectionPool, Arc<StubTransport>) {
        let registry = Arc::new(DeviceRegistry::in_memory());
        registry.upsert("tv", "10.0.0.1", 8009).await;
        let transport = Arc::new(StubTransport::new());
        (ConnectionPool::new(registry, transport.clone()), transport)
    }

    #[test]
    fn test_step_volume_clamps() {
        assert_eq!(step_volume(0.98, 0.05), 1.0);
        assert_eq!(step_volume(0.02, -0.05), 0.0);
        assert!((step_volume(0.5, 0.05) - 0.55).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_volume_up_clamps_to_one() {
        let (pool, transport) = pool().await;
        pool.get_connection("tv").await.unwrap();
        transport.session(0).set_level(0.98);

        let result = pool.volume_up("tv", DEFAULT_VOLUME_STEP).await.unwrap();
        assert_eq!(result, json!("volume up to 1"));
        assert_eq!(transport.session(0).volume().level, 1.0);
    }

    #[tokio::test]
    async fn test_volume_down_clamps_to_zero() {
        let (pool, transport) = pool().await;
        pool.get_connection("tv").await.unwrap();
        transport.session(0).set_level(0.02);

        let result = pool.volume_down("tv", DEFAULT_VOLUME_STEP).await.unwrap();
        assert_eq!(result, json!("volume down to 0"));
        assert_eq!(transport.session(0).volume().level, 0.0);
    }

    #[tokio::test]
    async fn test_verbs_return_descriptions() {
        let (pool, transport) = pool().await;

        assert_eq!(pool.play("tv").await.unwrap(), json!("playing"));
        assert_eq!(pool.seek("tv", 42.5).await.unwrap(), json!("seeked to 42.5"));
        assert_eq!(pool.mute("tv").await.unwrap(), json!("muted"));
        assert_eq!(pool.ping("tv").await.unwrap(), json!("pong"));
        assert_eq!(
            pool.launch_youtube("tv").await.unwrap(),
            json!("launched app 233637DE")
        );

        assert!(transport.session(0).volume().muted);
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_set_volume_rejects_out_of_range() {
        let (pool, transport) = pool().await;
        let err = pool.set_volume("tv", 1.5).await.unwrap_err();
        assert!(matches!(err, DeviceError::InvalidArgument(_)));
        assert_eq!(transport.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_discover_capabilities() {
        let (pool, _) = pool().await;
        let caps = pool.discover_capabilities("tv").await.unwrap();
        assert_eq!(caps["supportedMediaCommands"], json!(15));
        assert_eq!(caps["playerState"], json!("PLAYING"));
        assert_eq!(caps["volume"]["level"], json!(0.5));
    }

    #[test]
    fn test_queue_insert_merges_insert_before() {
        let op = build_queue_operation(
            QueueKind::Insert,
            r#"[{"media":{"contentId":"a.mp3"}}]"#,
            r#"{"currentItemIndex":0}"#,
            Some(json!(7)),
        )
        .unwrap();
        assert_eq!(op.options["insertBefore"], json!(7));
        assert_eq!(op.options["currentItemIndex"], json!(0));
        assert_eq!(op.items.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_queue_defaults_empty_options() {
        let op = build_queue_operation(QueueKind::Remove, "[1,2]", "", None).unwrap();
        assert!(op.options.is_empty());
    }

    #[tokio::test]
    async fn test_queue_rejects_malformed_items() {
        let (pool, transport) = pool().await;
        let err = pool.queue_load("tv", "not json", "{}").await.unwrap_err();
        assert!(matches!(err, DeviceError::InvalidArgument(_)));
        assert_eq!(transport.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_list_devices_needs_no_connection() {
        let (pool, transport) = pool().await;
        assert_eq!(pool.list_devices().await, json!(["tv"]));
        assert_eq!(transport.connect_count(), 0);
    }
}
