//! Persistent session channel to the realtime voice service.
//!
//! The transport owns one WebSocket connection per session. Outbound events
//! are funneled through a bounded channel into a single connection task;
//! inbound text frames are decoded into [`ServerEvent`]s and routed to the
//! registered callbacks by pattern-matched dispatch. The socket task is the
//! only place that touches the wire.
//!
//! # Thread Safety
//!
//! All mutable state is behind `Arc` so it can be shared between the public
//! handle and the spawned connection task. Callback slots and the outbound
//! sender use short `parking_lot` critical sections so `send` stays callable
//! from the capture thread without an async context.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{ClientError, Result};
use crate::session::messages::{ClientEvent, ServerEvent, normalize_error};

/// Channel capacity for outbound events.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Callback type for typed server events.
pub type EventCallback =
    Arc<dyn Fn(ServerEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for the generic message observer. Receives every inbound
/// message as raw JSON, including kinds the client does not understand.
pub type MessageCallback =
    Arc<dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for transport and protocol errors.
pub type ErrorCallback =
    Arc<dyn Fn(ClientError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

type CallbackSlot<T> = Arc<Mutex<Option<T>>>;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// No connection attempted yet
    #[default]
    Idle,
    /// Handshake in progress
    Connecting,
    /// Channel open, dispatching events
    Open,
    /// Channel closed
    Closed,
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportState::Idle => write!(f, "idle"),
            TransportState::Connecting => write!(f, "connecting"),
            TransportState::Open => write!(f, "open"),
            TransportState::Closed => write!(f, "closed"),
        }
    }
}

/// Persistent duplex message channel for one voice session.
pub struct SessionTransport {
    state: Arc<RwLock<TransportState>>,
    /// Open flag for lock-free checks from the capture path.
    open: Arc<AtomicBool>,
    ws_sender: Arc<Mutex<Option<mpsc::Sender<ClientEvent>>>>,
    event_callback: CallbackSlot<EventCallback>,
    message_callback: CallbackSlot<MessageCallback>,
    error_callback: CallbackSlot<ErrorCallback>,
    connection_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(TransportState::Idle)),
            open: Arc::new(AtomicBool::new(false)),
            ws_sender: Arc::new(Mutex::new(None)),
            event_callback: Arc::new(Mutex::new(None)),
            message_callback: Arc::new(Mutex::new(None)),
            error_callback: Arc::new(Mutex::new(None)),
            connection_handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransportState {
        *self.state.read()
    }

    /// Whether the channel is open and dispatching.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Register the typed event callback.
    pub fn on_event(&self, callback: EventCallback) {
        *self.event_callback.lock() = Some(callback);
    }

    /// Register the generic message observer.
    pub fn on_message(&self, callback: MessageCallback) {
        *self.message_callback.lock() = Some(callback);
    }

    /// Register the error callback.
    pub fn on_error(&self, callback: ErrorCallback) {
        *self.error_callback.lock() = Some(callback);
    }

    /// Open the session channel.
    ///
    /// Resolves once the channel is open and dispatching, so callers may
    /// start capture immediately afterwards without racing the handshake.
    /// A no-op
    /// when already connecting or open. On failure the transport transitions
    /// to `Closed` and the error callback fires with a transport error.
    pub async fn connect(&self, url: &str) -> Result<()> {
        {
            let mut state = self.state.write();
            if matches!(*state, TransportState::Connecting | TransportState::Open) {
                return Ok(());
            }
            *state = TransportState::Connecting;
        }

        let (ws_stream, _response) = match tokio_tungstenite::connect_async(url).await {
            Ok(conn) => conn,
            Err(e) => {
                *self.state.write() = TransportState::Closed;
                let message = format!("connect failed: {e}");
                fire_error(&self.error_callback, ClientError::Transport(message.clone())).await;
                return Err(ClientError::Transport(message));
            }
        };

        // The caller may have disconnected while the handshake was in flight.
        {
            let state = self.state.read();
            if *state == TransportState::Closed {
                tracing::info!("connection attempt abandoned: disconnected while connecting");
                return Ok(());
            }
        }

        tracing::info!("session channel connected: {url}");

        let (ws_sink, ws_source) = ws_stream.split();
        let (tx, rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);
        *self.ws_sender.lock() = Some(tx);

        let state = self.state.clone();
        let open = self.open.clone();
        let ws_sender = self.ws_sender.clone();
        let event_cb = self.event_callback.clone();
        let message_cb = self.message_callback.clone();
        let error_cb = self.error_callback.clone();

        self.open.store(true, Ordering::SeqCst);
        *self.state.write() = TransportState::Open;

        let handle = tokio::spawn(async move {
            run_connection(rx, ws_sink, ws_source, &event_cb, &message_cb, &error_cb).await;
            open.store(false, Ordering::SeqCst);
            *state.write() = TransportState::Closed;
            *ws_sender.lock() = None;
            tracing::info!("session channel task ended");
        });

        *self.connection_handle.lock() = Some(handle);
        Ok(())
    }

    /// Queue an event for transmission.
    ///
    /// Non-blocking and callable from any thread. When the channel is not
    /// open the event is dropped with a logged warning; callers are
    /// expected to guard on connection state, but races are tolerated.
    pub fn send(&self, event: ClientEvent) {
        if !self.is_open() {
            tracing::warn!("dropping outbound '{}' event: channel not open", event.kind());
            return;
        }
        let guard = self.ws_sender.lock();
        match guard.as_ref() {
            Some(tx) => {
                if let Err(e) = tx.try_send(event) {
                    tracing::warn!("outbound channel rejected event: {e}");
                }
            }
            None => tracing::warn!("dropping outbound event: channel already torn down"),
        }
    }

    /// Close the channel. Idempotent.
    pub fn disconnect(&self) {
        *self.ws_sender.lock() = None;
        if let Some(handle) = self.connection_handle.lock().take() {
            handle.abort();
        }
        self.open.store(false, Ordering::SeqCst);
        let mut state = self.state.write();
        if *state != TransportState::Idle {
            *state = TransportState::Closed;
        }
    }
}

impl Default for SessionTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Drive one connection until either side closes it.
async fn run_connection<Sink, Source>(
    mut rx: mpsc::Receiver<ClientEvent>,
    mut ws_sink: Sink,
    mut ws_source: Source,
    event_cb: &CallbackSlot<EventCallback>,
    message_cb: &CallbackSlot<MessageCallback>,
    error_cb: &CallbackSlot<ErrorCallback>,
) where
    Sink: futures_util::Sink<Message> + Unpin,
    <Sink as futures_util::Sink<Message>>::Error: std::fmt::Display,
    Source: futures_util::Stream<
            Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>,
        > + Unpin,
{
    loop {
        tokio::select! {
            // Outbound events
            outbound = rx.recv() => {
                let Some(event) = outbound else { break };
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("failed to serialize outbound event: {e}");
                        continue;
                    }
                };
                if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                    tracing::error!("failed to send on session channel: {e}");
                    fire_error(error_cb, ClientError::Transport(format!("send failed: {e}"))).await;
                    break;
                }
            }

            // Inbound messages
            inbound = ws_source.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_text(text.as_str(), event_cb, message_cb, error_cb).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                            tracing::error!("failed to send pong: {e}");
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("session channel closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("session channel error: {e}");
                        fire_error(error_cb, ClientError::Transport(e.to_string())).await;
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

/// Decode one inbound text frame and route it.
///
/// Every valid JSON message reaches the generic observer. Known kinds are
/// then dispatched as typed events; `error` payloads are normalized (with
/// the empty-object filter) before surfacing; unknown kinds pass through
/// silently for forward compatibility. Malformed messages surface a
/// protocol error and are otherwise ignored; they never close the channel.
async fn dispatch_text(
    text: &str,
    event_cb: &CallbackSlot<EventCallback>,
    message_cb: &CallbackSlot<MessageCallback>,
    error_cb: &CallbackSlot<ErrorCallback>,
) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("unparseable inbound message, dropping: {e}");
            fire_error(error_cb, ClientError::Protocol(format!("unparseable message: {e}"))).await;
            return;
        }
    };

    let observer = message_cb.lock().clone();
    if let Some(cb) = observer {
        cb(value.clone()).await;
    }

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();

    match serde_json::from_value::<ServerEvent>(value) {
        Ok(ServerEvent::Error { error }) => {
            if let Some(message) = normalize_error(&error) {
                tracing::error!("server reported error: {message}");
                fire_error(error_cb, ClientError::Server(message)).await;
            }
        }
        Ok(event) => {
            let callback = event_cb.lock().clone();
            if let Some(cb) = callback {
                cb(event).await;
            }
        }
        Err(e) => {
            if ServerEvent::is_known_kind(&kind) {
                tracing::warn!("malformed '{kind}' payload, dropping: {e}");
                fire_error(
                    error_cb,
                    ClientError::Protocol(format!("malformed '{kind}' payload: {e}")),
                )
                .await;
            } else {
                tracing::trace!("passing through unknown event kind '{kind}'");
            }
        }
    }
}

async fn fire_error(slot: &CallbackSlot<ErrorCallback>, err: ClientError) {
    let callback = slot.lock().clone();
    if let Some(cb) = callback {
        cb(err).await;
    }
}
