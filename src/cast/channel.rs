//! Framed Cast v2 message channel over a device socket
//!
//! One reader task decodes frames and routes replies to waiting requests by
//! `requestId`; one writer task owns the write half; a heartbeat task sends
//! `PING` on a fixed interval. The first read or write failure is latched as
//! the channel's transport error.

use crate::device::DeviceError;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use suitestream_shared::cast::{CastMessage, NS_CONNECTION, NS_HEARTBEAT, RECEIVER_ID, SENDER_ID};
use suitestream_shared::codec::{self, FrameDecoder};
use suitestream_shared::timing;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Reply types that carry a device-side failure
const ERROR_REPLY_TYPES: &[&str] = &[
    "LAUNCH_ERROR",
    "LOAD_FAILED",
    "LOAD_CANCELLED",
    "INVALID_REQUEST",
    "INVALID_PLAYER_STATE",
];

/// Callback for messages that are not replies to a request
pub type Listener = Arc<dyn Fn(&CastMessage, &Value) + Send + Sync>;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// Channel timing
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub heartbeat_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(timing::CAST_HEARTBEAT_INTERVAL_MS),
            request_timeout: Duration::from_millis(timing::CAST_REQUEST_TIMEOUT_MS),
        }
    }
}

/// An open message channel to one device
pub struct CastChannel {
    outbound: mpsc::UnboundedSender<CastMessage>,
    pending: PendingMap,
    next_request_id: AtomicU64,
    errors: watch::Receiver<Option<DeviceError>>,
    error_tx: Arc<watch::Sender<Option<DeviceError>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    request_timeout: Duration,
}

impl CastChannel {
    /// Start the channel tasks over `stream`
    pub fn open<S>(stream: S, config: ChannelConfig, listener: Listener) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (error_tx, errors) = watch::channel(None);
        let error_tx = Arc::new(error_tx);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let reader_task = {
            let dispatcher = Dispatcher {
                outbound: outbound.clone(),
                pending: pending.clone(),
                listener,
            };
            let error_tx = error_tx.clone();
            let pending = pending.clone();
            tokio::spawn(async move {
                let error = read_loop(reader, dispatcher).await;
                fail(&error_tx, &pending, error).await;
            })
        };

        let writer_task = {
            let error_tx = error_tx.clone();
            let pending = pending.clone();
            tokio::spawn(async move {
                if let Some(error) = write_loop(writer, outbound_rx).await {
                    fail(&error_tx, &pending, error).await;
                }
            })
        };

        let heartbeat_task = {
            let outbound = outbound.clone();
            let interval = config.heartbeat_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let ping = CastMessage::json(
                        SENDER_ID,
                        RECEIVER_ID,
                        NS_HEARTBEAT,
                        &json!({"type": "PING"}),
                    );
                    if outbound.send(ping).is_err() {
                        return;
                    }
                }
            })
        };

        Self {
            outbound,
            pending,
            next_request_id: AtomicU64::new(1),
            errors,
            error_tx,
            tasks: Mutex::new(vec![reader_task, writer_task, heartbeat_task]),
            request_timeout: config.request_timeout,
        }
    }

    /// Queue a message without waiting for a reply
    pub fn send(&self, destination: &str, namespace: &str, payload: &Value) -> Result<(), DeviceError> {
        if let Some(error) = self.latched_error() {
            return Err(error);
        }
        self.outbound
            .send(CastMessage::json(SENDER_ID, destination, namespace, payload))
            .map_err(|_| DeviceError::Transport("channel closed".into()))
    }

    /// Open a virtual connection to `destination`
    pub fn connect_virtual(&self, destination: &str) -> Result<(), DeviceError> {
        self.send(destination, NS_CONNECTION, &json!({"type": "CONNECT"}))
    }

    /// Send a request and wait for the reply carrying the same `requestId`
    pub async fn request(
        &self,
        destination: &str,
        namespace: &str,
        mut payload: Value,
    ) -> Result<Value, DeviceError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let kind = payload["type"].as_str().unwrap_or("?").to_string();
        if let Value::Object(map) = &mut payload {
            map.insert("requestId".into(), json!(request_id));
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id, tx);

        if let Err(e) = self.send(destination, namespace, &payload) {
            self.pending.lock().await.remove(&request_id);
            return Err(e);
        }
        trace!("[CAST] -> {} #{} to {}", kind, request_id, destination);

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => check_reply(reply),
            Ok(Err(_)) => Err(self
                .latched_error()
                .unwrap_or_else(|| DeviceError::Transport("channel closed".into()))),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(DeviceError::Timeout(format!("{} #{}", kind, request_id)))
            }
        }
    }

    /// Resolves with the first transport error
    pub async fn transport_error(&self) -> DeviceError {
        let mut errors = self.errors.clone();
        loop {
            if let Some(error) = latched(&errors) {
                return error;
            }
            if errors.changed().await.is_err() {
                return DeviceError::Transport("channel dropped".into());
            }
        }
    }

    /// Send CLOSE to the platform receiver and stop all tasks
    pub async fn close(&self) {
        let _ = self.send(RECEIVER_ID, NS_CONNECTION, &json!({"type": "CLOSE"}));
        // Let the writer flush the CLOSE before it is aborted
        tokio::task::yield_now().await;
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.error_tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(DeviceError::Transport("closed".into()));
                true
            } else {
                false
            }
        });
        self.pending.lock().await.clear();
    }

    fn latched_error(&self) -> Option<DeviceError> {
        latched(&self.errors)
    }
}

impl Drop for CastChannel {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.try_lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

fn latched(errors: &watch::Receiver<Option<DeviceError>>) -> Option<DeviceError> {
    errors.borrow().clone()
}

/// Latch the first error and release all waiting requests
async fn fail(
    error_tx: &watch::Sender<Option<DeviceError>>,
    pending: &PendingMap,
    error: DeviceError,
) {
    let latched = error_tx.send_if_modified(|slot| {
        if slot.is_none() {
            *slot = Some(error.clone());
            true
        } else {
            false
        }
    });
    if latched {
        warn!("[CAST] Channel failed: {}", error);
    }
    pending.lock().await.clear();
}

/// Map device error replies to `DeviceError::Device`
fn check_reply(reply: Value) -> Result<Value, DeviceError> {
    let kind = reply["type"].as_str().unwrap_or_default();
    if !ERROR_REPLY_TYPES.contains(&kind) {
        return Ok(reply);
    }
    let message = match reply["reason"].as_str() {
        Some(reason) => format!("{}: {}", kind, reason),
        None => kind.to_string(),
    };
    Err(DeviceError::Device(message))
}

struct Dispatcher {
    outbound: mpsc::UnboundedSender<CastMessage>,
    pending: PendingMap,
    listener: Listener,
}

impl Dispatcher {
    /// Route one inbound message; returns an error if the peer closed us
    async fn dispatch(&self, message: CastMessage) -> Option<DeviceError> {
        let Some(payload) = message.json_payload() else {
            debug!("[CAST] Ignoring non-JSON message on {}", message.namespace);
            return None;
        };
        let kind = payload["type"].as_str().unwrap_or_default();

        match (message.namespace.as_str(), kind) {
            (NS_HEARTBEAT, "PING") => {
                let pong = CastMessage::json(
                    SENDER_ID,
                    message.source_id.clone(),
                    NS_HEARTBEAT,
                    &json!({"type": "PONG"}),
                );
                let _ = self.outbound.send(pong);
                return None;
            }
            (NS_HEARTBEAT, _) => return None,
            (NS_CONNECTION, "CLOSE") if message.source_id == RECEIVER_ID => {
                return Some(DeviceError::Transport("connection closed by device".into()));
            }
            _ => {}
        }

        if let Some(request_id) = payload["requestId"].as_u64().filter(|id| *id != 0) {
            if let Some(waiter) = self.pending.lock().await.remove(&request_id) {
                trace!("[CAST] <- {} #{}", kind, request_id);
                let _ = waiter.send(payload);
                return None;
            }
        }

        (self.listener)(&message, &payload);
        None
    }
}

async fn read_loop<R>(mut reader: R, dispatcher: Dispatcher) -> DeviceError
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; 8192];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return DeviceError::Transport("connection closed by device".into()),
            Ok(n) => n,
            Err(e) => return DeviceError::Transport(e.to_string()),
        };
        decoder.extend(&buf[..n]);

        loop {
            match decoder.decode_next() {
                Ok(Some(message)) => {
                    if let Some(error) = dispatcher.dispatch(message).await {
                        return error;
                    }
                }
                Ok(None) => break,
                Err(e) => return DeviceError::Transport(e.to_string()),
            }
        }
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<CastMessage>,
) -> Option<DeviceError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let frame = match codec::encode(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("[CAST] Dropping unencodable message: {}", e);
                continue;
            }
        };
        if let Err(e) = writer.write_all(&frame).await {
            return Some(DeviceError::Transport(e.to_string()));
        }
        if let Err(e) = writer.flush().await {
            return Some(DeviceError::Transport(e.to_string()));
        }
    }
    None
}
