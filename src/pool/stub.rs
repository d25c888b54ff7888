//! Counting stub transport for pool and router tests

use crate::device::{
    DeviceControl, DeviceError, DeviceStatus, DeviceTransport, MediaLoad, QueueOperation,
    VolumeChange, VolumeStatus,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Records every call and lets tests inject failures
pub struct StubControl {
    calls: Mutex<Vec<String>>,
    volume: Mutex<VolumeStatus>,
    launch_error: Option<String>,
    transport_error: Mutex<Option<DeviceError>>,
    error_signal: Notify,
    closed: AtomicBool,
}

impl StubControl {
    fn new(launch_error: Option<String>, dead_on_arrival: bool) -> Self {
        let transport_error =
            dead_on_arrival.then(|| DeviceError::Transport("reset on arrival".into()));
        Self {
            calls: Mutex::new(Vec::new()),
            volume: Mutex::new(VolumeStatus {
                level: 0.5,
                muted: false,
            }),
            launch_error,
            transport_error: Mutex::new(transport_error),
            error_signal: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_level(&self, level: f64) {
        self.volume.lock().unwrap().level = level;
    }

    pub fn volume(&self) -> VolumeStatus {
        *self.volume.lock().unwrap()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Fire the transport error event
    pub fn fail_transport(&self, reason: &str) {
        *self.transport_error.lock().unwrap() = Some(DeviceError::Transport(reason.into()));
        self.error_signal.notify_one();
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl DeviceControl for StubControl {
    async fn launch_default_receiver(&self) -> Result<(), DeviceError> {
        self.record("launch_default_receiver");
        match &self.launch_error {
            Some(reason) => Err(DeviceError::Launch(reason.clone())),
            None => Ok(()),
        }
    }

    async fn play(&self) -> Result<(), DeviceError> {
        self.record("play");
        Ok(())
    }

    async fn pause(&self) -> Result<(), DeviceError> {
        self.record("pause");
        Ok(())
    }

    async fn stop(&self) -> Result<(), DeviceError> {
        self.record("stop");
        Ok(())
    }

    async fn seek(&self, seconds: f64) -> Result<(), DeviceError> {
        self.record(format!("seek {}", seconds));
        Ok(())
    }

    async fn set_volume(&self, change: VolumeChange) -> Result<(), DeviceError> {
        let mut volume = self.volume.lock().unwrap();
        match change {
            VolumeChange::Level(level) => volume.level = level,
            VolumeChange::Muted(muted) => volume.muted = muted,
        }
        drop(volume);
        self.record(format!("set_volume {:?}", change));
        Ok(())
    }

    async fn load_media(&self, media: &MediaLoad) -> Result<Value, DeviceError> {
        self.record(format!("load_media {} {}", media.url, media.content_type));
        Ok(json!({"playerState": "BUFFERING"}))
    }

    async fn get_status(&self) -> Result<DeviceStatus, DeviceError> {
        self.record("get_status");
        Ok(DeviceStatus {
            volume: self.volume(),
            player_state: Some("PLAYING".into()),
            supported_media_commands: Some(15),
            app_id: None,
        })
    }

    async fn launch_app(&self, app_id: &str) -> Result<(), DeviceError> {
        self.record(format!("launch_app {}", app_id));
        Ok(())
    }

    async fn queue(&self, operation: QueueOperation) -> Result<Value, DeviceError> {
        self.record(format!("queue {:?}", operation.kind));
        Ok(json!({
            "items": operation.items,
            "options": Value::Object(operation.options),
        }))
    }

    async fn set_active_tracks(&self, track_ids: Vec<Value>) -> Result<Value, DeviceError> {
        self.record("set_active_tracks");
        Ok(json!({ "activeTrackIds": track_ids }))
    }

    async fn transport_error(&self) -> DeviceError {
        loop {
            if let Some(error) = self.transport_error.lock().unwrap().clone() {
                return error;
            }
            self.error_signal.notified().await;
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Transport counting connect handshakes
#[derive(Default)]
pub struct StubTransport {
    sessions: Mutex<Vec<Arc<StubControl>>>,
    hosts: Mutex<Vec<String>>,
    connect_failure: Mutex<Option<String>>,
    launch_failure: Mutex<Option<String>>,
    dead_on_arrival: AtomicBool,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_count(&self) -> usize {
        self.hosts.lock().unwrap().len()
    }

    pub fn connected_hosts(&self) -> Vec<String> {
        self.hosts.lock().unwrap().clone()
    }

    /// The n-th session handed out
    pub fn session(&self, index: usize) -> Arc<StubControl> {
        self.sessions.lock().unwrap()[index].clone()
    }

    pub fn fail_next_connect(&self, reason: &str) {
        *self.connect_failure.lock().unwrap() = Some(reason.into());
    }

    pub fn fail_next_launch(&self, reason: &str) {
        *self.launch_failure.lock().unwrap() = Some(reason.into());
    }

    /// Hand out sessions whose transport error has already fired
    pub fn fail_sessions_on_arrival(&self) {
        self.dead_on_arrival.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceTransport for StubTransport {
    async fn connect(&self, host: &str, port: u16) -> Result<Arc<dyn DeviceControl>, DeviceError> {
        let address = format!("{}:{}", host, port);
        self.hosts.lock().unwrap().push(address.clone());

        // Give concurrent callers a chance to race the handshake
        tokio::task::yield_now().await;

        if let Some(reason) = self.connect_failure.lock().unwrap().take() {
            return Err(DeviceError::Connect { address, reason });
        }

        let session = Arc::new(StubControl::new(
            self.launch_failure.lock().unwrap().take(),
            self.dead_on_arrival.load(Ordering::SeqCst),
        ));
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}
