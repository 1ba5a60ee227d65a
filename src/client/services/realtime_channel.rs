//! Push channel to the school's realtime server.
//!
//! One physical WebSocket per user id is shared by every consumer in the
//! process. Consumers get a reference-counted [`ChannelLease`] from the
//! [`ChannelManager`]; the connection lives as long as at least one lease does.
//! Inbound `new_message` events fan out through the [`ChannelHub`] to every
//! registered [`MessageListener`], and a listener deregisters itself on drop.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::client::config::ClientConfig;
use crate::common::{ClientError, ClientResult, Identity, Message, UserId};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// JSON frame exchanged with the realtime server: `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ChannelFrame {
    Auth {
        token: Option<String>,
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    AuthResponse {
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    NewMessage(Message),
    SendMessage(Message),
}

const KNOWN_EVENTS: [&str; 4] = ["auth", "auth_response", "new_message", "send_message"];

/// Parses a text frame. Events this client does not know about yield `Ok(None)`.
pub fn parse_frame(text: &str) -> Result<Option<ChannelFrame>, String> {
    let generic: serde_json::Value = serde_json::from_str(text).map_err(|e| format!("Invalid JSON: {}", e))?;
    let event = generic
        .get("event")
        .and_then(|v| v.as_str())
        .ok_or("Missing event field")?;
    if !KNOWN_EVENTS.contains(&event) {
        return Ok(None);
    }
    serde_json::from_value(generic.clone())
        .map(Some)
        .map_err(|e| format!("Failed to parse {}: {}", event, e))
}

/// In-process side of the channel: listener registry plus the outbound queue.
pub struct ChannelHub {
    listeners: Mutex<HashMap<u64, mpsc::UnboundedSender<Message>>>,
    next_listener: AtomicU64,
    outgoing: mpsc::UnboundedSender<ChannelFrame>,
}

impl ChannelHub {
    /// Returns the hub and the receiving end of its outbound queue, which the
    /// transport drains.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Arc::new(Self {
            listeners: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
            outgoing: tx,
        });
        (hub, rx)
    }

    /// Registers a `new_message` listener. Dropping it deregisters.
    pub fn listen(self: &Arc<Self>) -> MessageListener {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().insert(id, tx);
        log::debug!("[WS:CLIENT] Listener {} registered", id);
        MessageListener {
            guard: ListenerGuard { id, hub: Arc::downgrade(self) },
            rx,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Delivers an inbound frame to the registered listeners.
    pub fn dispatch(&self, frame: ChannelFrame) {
        match frame {
            ChannelFrame::NewMessage(message) => {
                let mut listeners = self.listeners.lock();
                listeners.retain(|_, tx| tx.send(message.clone()).is_ok());
            }
            other => log::debug!("[WS:CLIENT] Ignoring inbound frame {:?}", other),
        }
    }

    /// Queues an outbound frame. Fire-and-forget: no acknowledgement is awaited.
    pub fn emit(&self, frame: ChannelFrame) -> ClientResult<()> {
        self.outgoing
            .send(frame)
            .map_err(|_| ClientError::Channel("transport stopped".to_string()))
    }

    fn deregister(&self, id: u64) {
        if self.listeners.lock().remove(&id).is_some() {
            log::debug!("[WS:CLIENT] Listener {} deregistered", id);
        }
    }
}

/// Registration of a listener in the hub; dropping it deregisters.
pub struct ListenerGuard {
    id: u64,
    hub: Weak<ChannelHub>,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.deregister(self.id);
        }
    }
}

pub struct MessageListener {
    guard: ListenerGuard,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl MessageListener {
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Splits the registration from the receiving end, so the owner can
    /// deregister synchronously while a task still holds the receiver.
    pub fn into_parts(self) -> (ListenerGuard, mpsc::UnboundedReceiver<Message>) {
        (self.guard, self.rx)
    }
}

#[derive(Debug, Clone)]
struct TransportSettings {
    url: String,
    identity: Identity,
    token: Option<String>,
    max_attempts: u32,
    reconnect_delay: Duration,
    reconnect_max_delay: Duration,
    auth_timeout: Duration,
}

impl TransportSettings {
    fn new(config: &ClientConfig, identity: Identity, token: Option<String>) -> Self {
        Self {
            url: config.realtime_url.clone(),
            identity,
            token,
            max_attempts: config.reconnect_attempts.max(1),
            reconnect_delay: config.reconnect_delay,
            reconnect_max_delay: config.reconnect_max_delay,
            auth_timeout: config.auth_timeout,
        }
    }
}

/// A live connection. Dropping the last reference stops the transport.
pub struct ChannelConnection {
    user_id: UserId,
    hub: Arc<ChannelHub>,
    task: JoinHandle<()>,
}

pub type ChannelLease = Arc<ChannelConnection>;

impl ChannelConnection {
    fn spawn(settings: TransportSettings) -> Self {
        let (hub, outgoing) = ChannelHub::new();
        let user_id = settings.identity.user_id;
        let task = tokio::spawn(run_transport(settings, hub.clone(), outgoing));
        Self { user_id, hub, task }
    }

    pub fn hub(&self) -> &Arc<ChannelHub> {
        &self.hub
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

impl Drop for ChannelConnection {
    fn drop(&mut self) {
        self.task.abort();
        log::info!("[WS:CLIENT] Socket disconnected for user {}", self.user_id);
    }
}

/// Process-wide owner of realtime connections, one per user id.
#[derive(Default)]
pub struct ChannelManager {
    connections: Mutex<HashMap<UserId, Weak<ChannelConnection>>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a lease on the user's connection, connecting if nobody holds one.
    /// Must be called from within a tokio runtime.
    pub fn acquire(&self, config: &ClientConfig, identity: Identity, token: Option<String>) -> ChannelLease {
        let mut connections = self.connections.lock();
        if let Some(existing) = connections.get(&identity.user_id).and_then(Weak::upgrade) {
            return existing;
        }
        let lease = Arc::new(ChannelConnection::spawn(TransportSettings::new(config, identity, token)));
        connections.insert(identity.user_id, Arc::downgrade(&lease));
        lease
    }

    pub fn active_connections(&self) -> usize {
        let mut connections = self.connections.lock();
        connections.retain(|_, weak| weak.strong_count() > 0);
        connections.len()
    }
}

async fn run_transport(
    settings: TransportSettings,
    hub: Arc<ChannelHub>,
    mut outgoing: mpsc::UnboundedReceiver<ChannelFrame>,
) {
    let mut failures = 0u32;
    let mut delay = settings.reconnect_delay;
    loop {
        match connect_and_authenticate(&settings).await {
            Ok(ws) => {
                failures = 0;
                delay = settings.reconnect_delay;
                log::info!("[WS:CLIENT] Socket connected for user {}", settings.identity.user_id);
                pump(ws, &hub, &mut outgoing).await;
                log::warn!("[WS:CLIENT] Connection lost, reconnecting in {:?}", delay);
            }
            Err(e) => {
                failures += 1;
                log::error!(
                    "[WS:CLIENT] Connection error (attempt {}/{}): {}",
                    failures, settings.max_attempts, e
                );
                if failures >= settings.max_attempts {
                    log::error!("[WS:CLIENT] Giving up after {} attempts", failures);
                    return;
                }
            }
        }
        tokio::time::sleep(delay).await;
        delay = std::cmp::min(delay * 2, settings.reconnect_max_delay);
    }
}

async fn connect_and_authenticate(settings: &TransportSettings) -> ClientResult<WsStream> {
    let mut url = Url::parse(&settings.url).map_err(|e| ClientError::Channel(format!("Invalid URL: {}", e)))?;
    url.query_pairs_mut()
        .append_pair("userId", &settings.identity.user_id.to_string());

    log::debug!("[WS:CLIENT] Connecting to {}", url);
    let (mut ws, _) = connect_async(url)
        .await
        .map_err(|e| ClientError::Channel(format!("Failed to connect: {}", e)))?;

    let auth = ChannelFrame::Auth {
        token: settings.token.clone(),
        user_id: settings.identity.user_id,
    };
    ws.send(WsMessage::Text(serde_json::to_string(&auth)?))
        .await
        .map_err(|e| ClientError::Channel(format!("Failed to send auth frame: {}", e)))?;

    let reply = tokio::time::timeout(settings.auth_timeout, ws.next())
        .await
        .map_err(|_| ClientError::Channel("Timed out waiting for auth response".to_string()))?;

    match reply {
        Some(Ok(WsMessage::Text(text))) => match parse_frame(&text) {
            Ok(Some(ChannelFrame::AuthResponse { success: true, .. })) => Ok(ws),
            Ok(Some(ChannelFrame::AuthResponse { success: false, error })) => Err(ClientError::Channel(
                error.unwrap_or_else(|| "Unknown authentication error".to_string()),
            )),
            Ok(_) => Err(ClientError::Channel("Unexpected frame during auth".to_string())),
            Err(e) => Err(ClientError::Channel(e)),
        },
        Some(Ok(WsMessage::Close(_))) | None => {
            Err(ClientError::Channel("Server closed connection during auth".to_string()))
        }
        Some(Ok(_)) => Err(ClientError::Channel("Unexpected message type during auth".to_string())),
        Some(Err(e)) => Err(ClientError::Channel(format!("WebSocket error during auth: {}", e))),
    }
}

/// Runs one connected session until the socket goes away. The hub keeps the
/// outbound sender, so `outgoing` stays open for the life of the transport.
async fn pump(ws: WsStream, hub: &ChannelHub, outgoing: &mut mpsc::UnboundedReceiver<ChannelFrame>) {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => match parse_frame(&text) {
                    Ok(Some(frame)) => hub.dispatch(frame),
                    Ok(None) => log::debug!("[WS:CLIENT] Unhandled event: {}", text),
                    Err(e) => log::warn!("[WS:CLIENT] Failed to parse frame: {}", e),
                },
                Some(Ok(WsMessage::Close(_))) | None => return,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("[WS:CLIENT] WebSocket error: {}", e);
                    return;
                }
            },
            Some(frame) = outgoing.recv() => {
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        log::error!("[WS:CLIENT] Failed to serialize outgoing frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(WsMessage::Text(json)).await {
                    log::error!("[WS:CLIENT] Failed to send frame: {}", e);
                    return;
                }
            },
        }
    }
}
