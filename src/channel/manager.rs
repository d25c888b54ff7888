//! Command channel manager with persistent connection and automatic reconnection

use anyhow::{anyhow, Result};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use suitestream_shared::socketio::{EnginePacket, SocketIoError, SocketPacket};
use suitestream_shared::{timing, CommandEnvelope, ResultEnvelope};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

/// Server to agent command event
pub const COMMAND_EVENT: &str = "device-command";
/// Agent to server reply event
pub const REPLY_EVENT: &str = "device-reply";

/// Words naming the credential in a connect error
const CREDENTIAL_WORDS: &[&str] = &["jwt", "token", "credential", "auth"];
/// Words saying the credential was refused
const REJECTION_WORDS: &[&str] = &["invalid", "expired", "malformed", "revoked"];

/// Events emitted by the channel manager
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Socket.IO session established
    Connected { sid: Option<String> },
    /// Connection dropped; the manager will reconnect
    Disconnected { reason: String },
    /// Command received from the server
    Command(CommandEnvelope),
    /// The server rejected the credential; the manager has stopped
    AuthRejected { reason: String },
    /// A connection attempt failed; the manager will retry
    ConnectionFailed { reason: String },
}

/// Configuration for the channel manager
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Control server base URL (http or https)
    pub central_url: String,
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
    /// WebSocket connect and Engine.IO handshake timeout
    pub connect_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            central_url: "http://soundscreen.soundcheckvn.com".into(),
            reconnect_delay: Duration::from_millis(timing::CHANNEL_RECONNECT_MS),
            max_reconnect_delay: Duration::from_millis(timing::CHANNEL_MAX_RECONNECT_MS),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ChannelConfig {
    /// WebSocket URL of the Socket.IO endpoint
    pub fn socket_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.central_url)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(anyhow!("Unsupported channel URL scheme: {}", other)),
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("Cannot use scheme {} for {}", scheme, self.central_url))?;
        url.set_path("/socket.io/");
        url.set_query(Some("EIO=4&transport=websocket"));
        Ok(url)
    }
}

/// Whether a connect error message names a bad credential
///
/// "unauthorized" counts on its own; otherwise the message must both name
/// the credential and say it was refused.
pub fn is_auth_failure(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    if message.contains("unauthorized") {
        return true;
    }
    let names_credential = CREDENTIAL_WORDS.iter().any(|w| message.contains(w));
    let refused = REJECTION_WORDS.iter().any(|w| message.contains(w));
    names_credential && refused
}

/// Why an established connection ended
#[derive(Error, Debug)]
enum SessionError {
    #[error("{0}")]
    AuthRejected(String),

    #[error("{0}")]
    Closed(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] SocketIoError),
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Maintains the authenticated command channel
pub struct ChannelManager {
    /// Replies to send to the server; buffered across reconnects
    outbound_tx: mpsc::Sender<ResultEnvelope>,
    /// Channel to receive connection events
    event_rx: mpsc::Receiver<ChannelEvent>,
    task: JoinHandle<()>,
}

impl ChannelManager {
    /// Start the connection loop with `token` as the device credential
    pub fn open(config: ChannelConfig, token: String) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel::<ResultEnvelope>(100);
        let (event_tx, event_rx) = mpsc::channel::<ChannelEvent>(100);

        let task = tokio::spawn(async move {
            channel_loop(config, token, outbound_rx, event_tx).await;
        });

        Self {
            outbound_tx,
            event_rx,
            task,
        }
    }

    /// Receive the next channel event; `None` once the loop has stopped
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.event_rx.recv().await
    }

    /// Get a clone of the sender for replies
    pub fn get_sender(&self) -> mpsc::Sender<ResultEnvelope> {
        self.outbound_tx.clone()
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Main connection loop with reconnection logic
async fn channel_loop(
    config: ChannelConfig,
    token: String,
    mut outbound_rx: mpsc::Receiver<ResultEnvelope>,
    event_tx: mpsc::Sender<ChannelEvent>,
) {
    let url = match config.socket_url() {
        Ok(url) => url,
        Err(e) => {
            let _ = event_tx
                .send(ChannelEvent::ConnectionFailed {
                    reason: e.to_string(),
                })
                .await;
            return;
        }
    };
    let mut reconnect_delay = config.reconnect_delay;

    loop {
        info!("[CHANNEL] Connecting to {}", url);

        match timeout(config.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((ws, _))) => {
                match handle_connection(ws, &config, &token, &mut outbound_rx, &event_tx).await {
                    Err(SessionError::AuthRejected(reason)) => {
                        let _ = event_tx.send(ChannelEvent::AuthRejected { reason }).await;
                        return;
                    }
                    Err(e) => {
                        let _ = event_tx
                            .send(ChannelEvent::Disconnected {
                                reason: e.to_string(),
                            })
                            .await;
                    }
                    Ok(connected) => {
                        if connected {
                            reconnect_delay = config.reconnect_delay;
                        }
                    }
                }
            }
            Ok(Err(tungstenite::Error::Http(response)))
                if matches!(response.status().as_u16(), 401 | 403) =>
            {
                let _ = event_tx
                    .send(ChannelEvent::AuthRejected {
                        reason: format!("handshake rejected with HTTP {}", response.status()),
                    })
                    .await;
                return;
            }
            Ok(Err(e)) => {
                let _ = event_tx
                    .send(ChannelEvent::ConnectionFailed {
                        reason: e.to_string(),
                    })
                    .await;
            }
            Err(_) => {
                let _ = event_tx
                    .send(ChannelEvent::ConnectionFailed {
                        reason: "connect timed out".into(),
                    })
                    .await;
            }
        }

        if event_tx.is_closed() {
            return;
        }

        // Wait before reconnecting
        tokio::time::sleep(reconnect_delay).await;

        // Exponential backoff
        reconnect_delay = std::cmp::min(reconnect_delay * 2, config.max_reconnect_delay);
    }
}

/// Run one WebSocket connection until it ends
///
/// Returns `Ok(true)` if the Socket.IO session had been established before
/// the peer closed it cleanly.
async fn handle_connection(
    ws: WsStream,
    config: &ChannelConfig,
    token: &str,
    outbound_rx: &mut mpsc::Receiver<ResultEnvelope>,
    event_tx: &mpsc::Sender<ChannelEvent>,
) -> Result<bool, SessionError> {
    let (mut sink, mut stream) = ws.split();

    // Engine.IO handshake
    let open = match timeout(config.connect_timeout, stream.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => EnginePacket::decode(&text)?,
        Ok(Some(Ok(other))) => {
            return Err(SessionError::Closed(format!("unexpected handshake frame: {:?}", other)))
        }
        Ok(Some(Err(e))) => return Err(e.into()),
        Ok(None) => return Err(SessionError::Closed("closed during handshake".into())),
        Err(_) => return Err(SessionError::Closed("handshake timed out".into())),
    };
    let info = match open {
        EnginePacket::Open(info) => info,
        other => {
            return Err(SessionError::Closed(format!(
                "expected open packet, got {:?}",
                other
            )))
        }
    };
    let read_timeout = Duration::from_millis(info.ping_interval + info.ping_timeout);
    debug!("[CHANNEL] Engine open sid={} read_timeout={:?}", info.sid, read_timeout);

    let auth = SocketPacket::Connect(Some(json!({ "deviceJwt": token })));
    sink.send(Message::Text(auth.to_frame())).await?;

    let mut connected = false;

    loop {
        tokio::select! {
            // Replies wait in the queue until the namespace is connected
            Some(reply) = outbound_rx.recv(), if connected => {
                let payload = serde_json::to_value(&reply).map_err(SocketIoError::from)?;
                let frame = SocketPacket::event(REPLY_EVENT, payload).to_frame();
                debug!("[CHANNEL] Reply {} status={:?}", reply.id, reply.status);
                sink.send(Message::Text(frame)).await?;
            }

            result = timeout(read_timeout, stream.next()) => {
                let frame = match result {
                    Ok(Some(Ok(frame))) => frame,
                    Ok(Some(Err(e))) => return Err(e.into()),
                    Ok(None) => return Err(SessionError::Closed("server closed connection".into())),
                    Err(_) => return Err(SessionError::Closed("ping timeout".into())),
                };

                let text = match frame {
                    Message::Text(text) => text,
                    Message::Close(_) => return Ok(connected),
                    _ => continue,
                };

                match EnginePacket::decode(&text)? {
                    EnginePacket::Ping => {
                        sink.send(Message::Text(EnginePacket::Pong.encode())).await?;
                    }
                    EnginePacket::Close => return Ok(connected),
                    EnginePacket::Message(payload) => {
                        match SocketPacket::decode(&payload) {
                            Ok(packet) => {
                                if handle_packet(packet, &mut connected, event_tx).await? {
                                    return Ok(connected);
                                }
                            }
                            Err(e) => warn!("[CHANNEL] Ignoring malformed packet: {}", e),
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

/// React to one Socket.IO packet; returns `true` when the server disconnected us
async fn handle_packet(
    packet: SocketPacket,
    connected: &mut bool,
    event_tx: &mpsc::Sender<ChannelEvent>,
) -> Result<bool, SessionError> {
    match packet {
        SocketPacket::Connect(data) => {
            *connected = true;
            let sid = data
                .as_ref()
                .and_then(|d| d["sid"].as_str())
                .map(str::to_string);
            let _ = event_tx.send(ChannelEvent::Connected { sid }).await;
        }
        SocketPacket::ConnectError(_) => {
            let message = packet
                .error_message()
                .unwrap_or_else(|| "connect error".into());
            if is_auth_failure(&message) {
                return Err(SessionError::AuthRejected(message));
            }
            return Err(SessionError::Closed(format!("connect error: {}", message)));
        }
        SocketPacket::Event { name, mut data, .. } if name == COMMAND_EVENT => {
            if data.is_empty() {
                warn!("[CHANNEL] {} without payload", COMMAND_EVENT);
                return Ok(false);
            }
            match serde_json::from_value::<CommandEnvelope>(data.swap_remove(0)) {
                Ok(command) => {
                    let _ = event_tx.send(ChannelEvent::Command(command)).await;
                }
                Err(e) => warn!("[CHANNEL] Ignoring malformed command: {}", e),
            }
        }
        SocketPacket::Event { name, .. } => debug!("[CHANNEL] Ignoring event {}", name),
        SocketPacket::Disconnect => return Ok(true),
        SocketPacket::Ack { .. } => {}
    }
    Ok(false)
}
