//! Cast v2 device control: receiver apps, volume and media sessions

use super::channel::{CastChannel, ChannelConfig, Listener};
use super::tls;
use crate::device::{
    DeviceControl, DeviceError, DeviceStatus, DeviceTransport, MediaLoad, QueueKind,
    QueueOperation, VolumeChange, VolumeStatus,
};
use async_trait::async_trait;
use rustls::ClientConfig;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use suitestream_shared::cast::{
    CastMessage, DEFAULT_MEDIA_RECEIVER_APP_ID, NS_CONNECTION, NS_MEDIA, NS_RECEIVER, RECEIVER_ID,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

/// Opens Cast v2 sessions over TLS
pub struct CastTransport {
    tls_config: Arc<ClientConfig>,
    connect_timeout: Duration,
    channel_config: ChannelConfig,
}

impl CastTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self, DeviceError> {
        Ok(Self {
            tls_config: tls::device_client_config()?,
            connect_timeout,
            channel_config: ChannelConfig::default(),
        })
    }
}

#[async_trait]
impl DeviceTransport for CastTransport {
    async fn connect(&self, host: &str, port: u16) -> Result<Arc<dyn DeviceControl>, DeviceError> {
        let stream = tls::connect(self.tls_config.clone(), host, port, self.connect_timeout).await?;
        let client = CastClient::open(stream, self.channel_config.clone())?;
        info!("[CAST] Connected to {}:{}", host, port);
        Ok(Arc::new(client))
    }

    fn name(&self) -> &'static str {
        "castv2"
    }
}

/// A running receiver application
#[derive(Debug, Clone, PartialEq)]
struct AppSession {
    app_id: String,
    session_id: String,
    transport_id: String,
}

#[derive(Debug, Default)]
struct SessionState {
    app: Option<AppSession>,
    media_session_id: Option<i64>,
}

type SharedState = Arc<Mutex<SessionState>>;

/// Control session with one Cast device
pub struct CastClient {
    channel: CastChannel,
    state: SharedState,
}

impl CastClient {
    /// Start a session over an established device socket
    pub fn open<S>(stream: S, config: ChannelConfig) -> Result<Self, DeviceError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let state: SharedState = Arc::default();
        let channel = CastChannel::open(stream, config, status_listener(state.clone()));
        channel.connect_virtual(RECEIVER_ID)?;
        Ok(Self { channel, state })
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Launch `app_id` and attach to its transport
    async fn launch(&self, app_id: &str) -> Result<AppSession, DeviceError> {
        let reply = self
            .channel
            .request(RECEIVER_ID, NS_RECEIVER, json!({"type": "LAUNCH", "appId": app_id}))
            .await?;

        let app = find_app(&reply, app_id)
            .ok_or_else(|| DeviceError::Launch(format!("{} not running after LAUNCH", app_id)))?;
        self.channel.connect_virtual(&app.transport_id)?;
        debug!(
            "[CAST] Launched {} session={} transport={}",
            app.app_id, app.session_id, app.transport_id
        );

        self.with_state(|state| {
            state.app = Some(app.clone());
            state.media_session_id = None;
        });
        Ok(app)
    }

    fn app(&self) -> Result<AppSession, DeviceError> {
        self.with_state(|state| state.app.clone())
            .ok_or_else(|| DeviceError::Device("No receiver application running".into()))
    }

    /// Media status request to the running app; records the media session
    async fn media_request(&self, payload: Value) -> Result<Value, DeviceError> {
        let app = self.app()?;
        let reply = self.channel.request(&app.transport_id, NS_MEDIA, payload).await?;
        if let Some(id) = media_session_id(&reply) {
            self.with_state(|state| state.media_session_id = Some(id));
        }
        Ok(reply)
    }

    /// Current media session, querying the app if none is known yet
    async fn media_session(&self) -> Result<i64, DeviceError> {
        if let Some(id) = self.with_state(|state| state.media_session_id) {
            return Ok(id);
        }
        self.media_request(json!({"type": "GET_STATUS"})).await?;
        self.with_state(|state| state.media_session_id)
            .ok_or_else(|| DeviceError::Device("No active media session".into()))
    }

    /// Send a media verb bound to the current media session
    async fn media_command(&self, kind: &str, extra: Value) -> Result<Value, DeviceError> {
        let session = self.media_session().await?;
        let mut payload = json!({"type": kind, "mediaSessionId": session});
        merge(&mut payload, extra);
        self.media_request(payload).await
    }

    async fn receiver_status(&self) -> Result<Value, DeviceError> {
        let reply = self
            .channel
            .request(RECEIVER_ID, NS_RECEIVER, json!({"type": "GET_STATUS"}))
            .await?;
        Ok(reply["status"].clone())
    }
}

#[async_trait]
impl DeviceControl for CastClient {
    async fn launch_default_receiver(&self) -> Result<(), DeviceError> {
        self.launch(DEFAULT_MEDIA_RECEIVER_APP_ID).await.map(|_| ())
    }

    async fn play(&self) -> Result<(), DeviceError> {
        self.media_command("PLAY", json!({})).await.map(|_| ())
    }

    async fn pause(&self) -> Result<(), DeviceError> {
        self.media_command("PAUSE", json!({})).await.map(|_| ())
    }

    async fn stop(&self) -> Result<(), DeviceError> {
        self.media_command("STOP", json!({})).await.map(|_| ())
    }

    async fn seek(&self, seconds: f64) -> Result<(), DeviceError> {
        self.media_command("SEEK", json!({"currentTime": seconds}))
            .await
            .map(|_| ())
    }

    async fn set_volume(&self, change: VolumeChange) -> Result<(), DeviceError> {
        let volume = match change {
            VolumeChange::Level(level) => json!({"level": level}),
            VolumeChange::Muted(muted) => json!({"muted": muted}),
        };
        self.channel
            .request(
                RECEIVER_ID,
                NS_RECEIVER,
                json!({"type": "SET_VOLUME", "volume": volume}),
            )
            .await
            .map(|_| ())
    }

    async fn load_media(&self, media: &MediaLoad) -> Result<Value, DeviceError> {
        let mut metadata = json!({"type": 0, "metadataType": 0, "title": media.title});
        if !media.thumbnail.is_empty() {
            metadata["images"] = json!([{"url": media.thumbnail}]);
        }
        let reply = self
            .media_request(json!({
                "type": "LOAD",
                "media": {
                    "contentId": media.url,
                    "contentType": media.content_type,
                    "streamType": "BUFFERED",
                    "metadata": metadata,
                },
                "autoplay": true,
                "currentTime": 0,
            }))
            .await?;
        Ok(first_media_status(&reply))
    }

    async fn get_status(&self) -> Result<DeviceStatus, DeviceError> {
        let receiver = self.receiver_status().await?;
        let volume: VolumeStatus =
            serde_json::from_value(receiver["volume"].clone()).unwrap_or_default();
        let app_id = receiver["applications"][0]["appId"]
            .as_str()
            .map(str::to_string);

        let mut status = DeviceStatus {
            volume,
            app_id,
            ..Default::default()
        };

        // Media details only exist while an app with a media session runs
        if self.app().is_ok() {
            if let Ok(reply) = self.media_request(json!({"type": "GET_STATUS"})).await {
                let media = first_media_status(&reply);
                status.player_state = media["playerState"].as_str().map(str::to_string);
                status.supported_media_commands = media["supportedMediaCommands"].as_u64();
            }
        }
        Ok(status)
    }

    async fn launch_app(&self, app_id: &str) -> Result<(), DeviceError> {
        self.launch(app_id).await.map(|_| ())
    }

    async fn queue(&self, operation: QueueOperation) -> Result<Value, DeviceError> {
        let mut payload = Value::Object(operation.options);
        payload["type"] = json!(operation.kind.message_type());
        payload[operation.kind.items_key()] = operation.items;

        let reply = if operation.kind == QueueKind::Load {
            self.media_request(payload).await?
        } else {
            let session = self.media_session().await?;
            payload["mediaSessionId"] = json!(session);
            self.media_request(payload).await?
        };
        Ok(first_media_status(&reply))
    }

    async fn set_active_tracks(&self, track_ids: Vec<Value>) -> Result<Value, DeviceError> {
        let reply = self
            .media_command("EDIT_TRACKS_INFO", json!({"activeTrackIds": track_ids}))
            .await?;
        Ok(first_media_status(&reply))
    }

    async fn transport_error(&self) -> DeviceError {
        self.channel.transport_error().await
    }

    async fn close(&self) {
        self.channel.close().await;
    }
}

/// Tracks unsolicited status broadcasts from the device
fn status_listener(state: SharedState) -> Listener {
    Arc::new(move |message: &CastMessage, payload: &Value| {
        let mut state = match state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match (message.namespace.as_str(), payload["type"].as_str()) {
            (NS_MEDIA, Some("MEDIA_STATUS")) => {
                if let Some(id) = media_session_id(payload) {
                    state.media_session_id = Some(id);
                }
            }
            (NS_CONNECTION, Some("CLOSE")) => {
                let closed = state
                    .app
                    .as_ref()
                    .is_some_and(|app| app.transport_id == message.source_id);
                if closed {
                    debug!("[CAST] App transport {} closed", message.source_id);
                    state.app = None;
                    state.media_session_id = None;
                }
            }
            (NS_RECEIVER, Some("RECEIVER_STATUS")) => {
                let running = state
                    .app
                    .as_ref()
                    .map(|app| find_app(payload, &app.app_id).is_some());
                if running == Some(false) {
                    state.app = None;
                    state.media_session_id = None;
                }
            }
            _ => {}
        }
    })
}

fn find_app(receiver_status: &Value, app_id: &str) -> Option<AppSession> {
    receiver_status["status"]["applications"]
        .as_array()?
        .iter()
        .find(|app| app["appId"] == app_id)
        .and_then(|app| {
            Some(AppSession {
                app_id: app_id.to_string(),
                session_id: app["sessionId"].as_str()?.to_string(),
                transport_id: app["transportId"].as_str()?.to_string(),
            })
        })
}

fn media_session_id(media_status: &Value) -> Option<i64> {
    media_status["status"]
        .as_array()?
        .iter()
        .find_map(|status| status["mediaSessionId"].as_i64())
}

fn first_media_status(reply: &Value) -> Value {
    match reply["status"].as_array().and_then(|all| all.first()) {
        Some(status) => status.clone(),
        None => reply.clone(),
    }
}

fn merge(target: &mut Value, extra: Value) {
    if let (Value::Object(target), Value::Object(extra)) = (target, extra) {
        target.extend(extra);
    }
}
