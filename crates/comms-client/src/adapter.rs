//! The managed relay connection.
//!
//! Lifecycle is `connect` / `release` / `disconnect` / `dispose`.
//! `release` does not tear the socket down immediately: it schedules a
//! short-delay disconnect so a component that re-requests the connection
//! right away (navigation churn) reuses the live socket. Any `connect`
//! arriving before the timer fires cancels it.
//!
//! There is no adapter-level reconnect loop; a dropped transport only
//! flips the connected flag, and the next `connect` re-syncs presence
//! from the server's snapshot.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::debug;

use comms_common::{Attachment, ClientEvent, ProtocolError, ServerEvent, TypingPayload};

use crate::config::AdapterConfig;
use crate::events::CommsRealtimePayload;

/// Maps a thread id to the user ids that should receive typing signals.
/// Fan-out policy stays with the caller, so the adapter needs no notion
/// of group vs. direct threads.
pub type RecipientResolver = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("not connected")]
    NotConnected,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Released; teardown is scheduled but the socket is still live.
    DisconnectPending,
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<WsMessage>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    pending_disconnect: Option<JoinHandle<()>>,
}

// Close the transport and reset the state machine. Kept synchronous:
// the deferred-disconnect timer runs this and aborts itself last, so
// nothing may await after the abort.
fn teardown(inner: &mut Inner, connected: &AtomicBool) {
    inner.outbound = None;
    if let Some(reader) = inner.reader.take() {
        reader.abort();
    }
    if let Some(writer) = inner.writer.take() {
        writer.abort();
    }
    inner.state = ConnectionState::Disconnected;
    connected.store(false, Ordering::SeqCst);
    if let Some(pending) = inner.pending_disconnect.take() {
        pending.abort();
    }
}

/// Single managed connection to the relay. Constructed once at the
/// application's composition root and shared from there.
pub struct RealtimeAdapter {
    config: AdapterConfig,
    resolver: RecipientResolver,
    events: broadcast::Sender<CommsRealtimePayload>,
    online: Arc<RwLock<HashSet<String>>>,
    connected: Arc<AtomicBool>,
    inner: Arc<Mutex<Inner>>,
}

impl RealtimeAdapter {
    pub fn new(config: AdapterConfig, resolver: RecipientResolver) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            resolver,
            events,
            online: Arc::new(RwLock::new(HashSet::new())),
            connected: Arc::new(AtomicBool::new(false)),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Subscribe to the normalized event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<CommsRealtimePayload> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> ConnectionState {
        let inner = self.inner.lock().await;
        match inner.state {
            // The transport can die underneath us; the flag is the truth.
            ConnectionState::Connected if !self.is_connected() => ConnectionState::Disconnected,
            state => state,
        }
    }

    /// Current online set, replaced wholesale on every `online-users`.
    pub async fn online_users(&self) -> HashSet<String> {
        self.online.read().await.clone()
    }

    /// Open the connection if it is not already open. Cancels a pending
    /// deferred disconnect, in which case the live socket is reused and
    /// no handshake happens.
    pub async fn connect(&self) -> Result<(), AdapterError> {
        let mut inner = self.inner.lock().await;

        if let Some(pending) = inner.pending_disconnect.take() {
            pending.abort();
            if inner.state == ConnectionState::DisconnectPending {
                inner.state = ConnectionState::Connected;
            }
        }
        if inner.state == ConnectionState::Connected && self.is_connected() {
            return Ok(());
        }

        inner.state = ConnectionState::Connecting;
        let url = self.config.websocket_url();
        debug!("[Adapter] Connecting to {}", url);

        let (stream, _) = match connect_async(url.as_str()).await {
            Ok(pair) => pair,
            Err(e) => {
                // connect_error and disconnect look the same to callers.
                inner.state = ConnectionState::Disconnected;
                self.connected.store(false, Ordering::SeqCst);
                return Err(AdapterError::Transport(e.to_string()));
            }
        };
        let (mut ws_tx, mut ws_rx) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if ws_tx.send(frame).await.is_err() {
                    break;
                }
            }
        });

        let connected = self.connected.clone();
        let online = self.online.clone();
        let events = self.events.clone();
        let reader = tokio::spawn(async move {
            while let Some(result) = ws_rx.next().await {
                let frame = match result {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!("[Adapter] Transport error: {}", e);
                        break;
                    }
                };
                match frame {
                    WsMessage::Text(text) => match ServerEvent::decode(text.as_str()) {
                        Ok(event) => {
                            if let ServerEvent::OnlineUsers(payload) = &event {
                                *online.write().await = payload.clone().into_set();
                            }
                            let _ = events.send(CommsRealtimePayload::from_wire(event));
                        }
                        Err(e) => debug!("[Adapter] Undecodable frame: {}", e),
                    },
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
            connected.store(false, Ordering::SeqCst);
        });

        inner.outbound = Some(tx);
        inner.reader = Some(reader);
        inner.writer = Some(writer);
        inner.state = ConnectionState::Connected;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Schedule teardown after the configured delay instead of closing
    /// immediately. A `connect` within the window keeps the socket.
    pub async fn release(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != ConnectionState::Connected {
            return;
        }
        inner.state = ConnectionState::DisconnectPending;

        let shared = self.inner.clone();
        let connected = self.connected.clone();
        let delay = self.config.deferred_disconnect;
        inner.pending_disconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut inner = shared.lock().await;
            teardown(&mut inner, &connected);
        }));
    }

    /// Tear the connection down now, cancelling any pending timer.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        teardown(&mut inner, &self.connected);
    }

    /// Final teardown; callers treat dispose as end-of-life even though
    /// the adapter could technically be connected again.
    pub async fn dispose(&self) {
        self.disconnect().await;
    }

    async fn emit(&self, event: ClientEvent) -> Result<(), AdapterError> {
        let raw = serde_json::to_string(&event).map_err(ProtocolError::from)?;
        let inner = self.inner.lock().await;
        let sender = inner.outbound.as_ref().ok_or(AdapterError::NotConnected)?;
        sender
            .send(WsMessage::text(raw))
            .map_err(|_| AdapterError::NotConnected)?;
        Ok(())
    }

    pub async fn join_thread(&self, thread_id: &str) -> Result<(), AdapterError> {
        self.emit(ClientEvent::JoinThread {
            thread_id: thread_id.to_string(),
        })
        .await
    }

    pub async fn leave_thread(&self, thread_id: &str) -> Result<(), AdapterError> {
        self.emit(ClientEvent::LeaveThread {
            thread_id: thread_id.to_string(),
        })
        .await
    }

    pub async fn start_typing(&self, thread_id: &str) -> Result<(), AdapterError> {
        self.send_typing(thread_id, true).await
    }

    pub async fn stop_typing(&self, thread_id: &str) -> Result<(), AdapterError> {
        self.send_typing(thread_id, false).await
    }

    // One typing event per resolved recipient.
    async fn send_typing(&self, thread_id: &str, is_typing: bool) -> Result<(), AdapterError> {
        for recipient in (self.resolver)(thread_id) {
            self.emit(ClientEvent::Typing(TypingPayload {
                is_typing,
                thread_id: Some(thread_id.to_string()),
                recipient_id: Some(recipient),
                user_name: self.config.user_name.clone(),
            }))
            .await?;
        }
        Ok(())
    }

    pub async fn send_message(
        &self,
        thread_id: &str,
        content: &str,
        reply_to_id: Option<String>,
        attachments: Vec<Attachment>,
    ) -> Result<(), AdapterError> {
        self.emit(ClientEvent::SendMessage {
            thread_id: thread_id.to_string(),
            content: content.to_string(),
            reply_to_id,
            attachments,
            user_name: self.config.user_name.clone(),
        })
        .await
    }

    pub async fn mark_seen(&self, message_id: &str, thread_id: &str) -> Result<(), AdapterError> {
        self.emit(ClientEvent::MessageSeen {
            message_id: message_id.to_string(),
            thread_id: thread_id.to_string(),
        })
        .await
    }
}
