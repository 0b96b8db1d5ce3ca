//! WebSocket lifecycle for one chat session
//!
//! ## Design
//!
//! - `connect()` spawns a socket task for a new *generation*. Every callback
//!   from a socket task carries its generation; anything reported by a
//!   superseded generation is ignored, so a late close from an old socket can
//!   never schedule a reconnect or flip the state.
//! - An unexpected close (read error, server close, failed handshake) schedules
//!   exactly one reconnect after a fixed delay. A new `connect()` or a manual
//!   `disconnect()` cancels the pending timer.
//! - `disconnect()` bumps the generation and drops the outbound sender; the
//!   socket task notices the closed channel, sends a close frame and exits.
//!
//! Inbound text frames and state changes are forwarded in order on an mpsc
//! channel of [`ConnectionEvent`]s, each tagged with the generation of the
//! socket it came from.

use super::error::{ChatClientError, Result};
use super::session::SessionId;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

/// Delay before reconnecting after an unexpected close
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Never connected
    Idle,
    Connecting,
    Open,
    /// Closed, either manually or while waiting for a reconnect
    Closed,
}

/// Events forwarded from the socket task to the chat client
///
/// `generation` identifies the socket the event belongs to. Events can still be
/// queued after their socket was superseded, so consumers compare it against
/// the generation they consider live.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged {
        generation: u64,
        state: ConnectionState,
    },
    /// Raw inbound text frame
    Frame { generation: u64, text: String },
    /// Generic connection failure (network and protocol errors look the same)
    Error { generation: u64, message: String },
}

impl ConnectionEvent {
    pub fn generation(&self) -> u64 {
        match self {
            ConnectionEvent::StateChanged { generation, .. }
            | ConnectionEvent::Frame { generation, .. }
            | ConnectionEvent::Error { generation, .. } => *generation,
        }
    }
}

/// Build the session-scoped WebSocket endpoint from the HTTP server base URL.
///
/// `http` maps to `ws` and `https` to `wss`; any path prefix on the base is kept.
pub fn chat_endpoint(server_url: &Url, session_id: &SessionId) -> Result<Url> {
    let mut url = server_url.clone();
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ChatClientError::InvalidUrl(format!(
                "unsupported scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ChatClientError::InvalidUrl(server_url.to_string()))?;
    let prefix = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{}/api/ws/chat/{}", prefix, session_id));
    url.set_query(None);
    Ok(url)
}

/// A single pending reconnect attempt. Scheduling replaces (aborts) any
/// previously pending attempt.
#[derive(Debug, Default)]
pub struct ReconnectTimer {
    handle: Option<JoinHandle<()>>,
}

impl ReconnectTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, cancelling whatever was scheduled before
    pub fn schedule<F>(&mut self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        }));
    }

    /// Abort the pending attempt. Returns whether one was still waiting.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                let was_pending = !handle.is_finished();
                handle.abort();
                was_pending
            }
            None => false,
        }
    }

    /// Forget the handle without aborting; used by the timer task itself once it fires
    fn release(&mut self) {
        self.handle = None;
    }

    pub fn is_pending(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

struct Inner {
    endpoint: Url,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    reconnect: ReconnectTimer,
}

/// Owns the WebSocket for one session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Mutex<Inner>>,
    generation: Arc<AtomicU64>,
    state: Arc<watch::Sender<ConnectionState>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    reconnect_delay: Duration,
}

impl ConnectionManager {
    /// Create a manager for `endpoint`. Does not connect.
    pub fn new(
        endpoint: Url,
        reconnect_delay: Duration,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                endpoint,
                outbound: None,
                reconnect: ReconnectTimer::new(),
            })),
            generation: Arc::new(AtomicU64::new(0)),
            state: Arc::new(state),
            events,
            reconnect_delay,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Watch state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub async fn endpoint(&self) -> Url {
        self.inner.lock().await.endpoint.clone()
    }

    /// Point future connections at another endpoint (e.g. after a session reset).
    /// An open socket is not affected until it is reconnected.
    pub async fn set_endpoint(&self, endpoint: Url) {
        self.inner.lock().await.endpoint = endpoint;
    }

    /// Open the socket unless one is already open or connecting
    pub async fn connect(&self) {
        let mut inner = self.inner.lock().await;
        inner.reconnect.cancel();
        if matches!(
            self.state(),
            ConnectionState::Open | ConnectionState::Connecting
        ) {
            debug!("connect() ignored: connection already active");
            return;
        }
        self.start(&mut inner);
    }

    /// Close the socket and cancel any pending reconnect. Terminal until the
    /// next `connect()`.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if inner.reconnect.cancel() {
            debug!("Pending reconnect cancelled by disconnect()");
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        // Dropping the sender makes the socket task close gracefully
        inner.outbound = None;
        if self.state() != ConnectionState::Closed {
            info!(endpoint = %inner.endpoint, "Chat connection closed by client");
            self.set_state(ConnectionState::Closed);
        }
    }

    /// Queue a text frame. Fails with `NotConnected` unless the socket is open.
    pub async fn send_text(&self, text: String) -> Result<()> {
        let inner = self.inner.lock().await;
        if !self.is_open() {
            return Err(ChatClientError::NotConnected);
        }
        let tx = inner.outbound.as_ref().ok_or(ChatClientError::NotConnected)?;
        tx.send(Message::Text(text.into()))
            .map_err(|_| ChatClientError::NotConnected)
    }

    /// Current socket generation. Bumped by every connect attempt and every
    /// `disconnect()`.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Whether a reconnect attempt is waiting on its timer
    pub async fn reconnect_pending(&self) -> bool {
        self.inner.lock().await.reconnect.is_pending()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            let _ = self.events.send(ConnectionEvent::StateChanged {
                generation: self.generation(),
                state,
            });
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn start(&self, inner: &mut Inner) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let endpoint = inner.endpoint.clone();
        self.set_state(ConnectionState::Connecting);
        debug!(endpoint = %endpoint, generation, "Opening chat WebSocket");
        tokio::spawn(self.clone().run_socket(generation, endpoint));
    }

    /// Fired by the reconnect timer
    async fn reconnect_now(self) {
        let mut inner = self.inner.lock().await;
        inner.reconnect.release();
        if matches!(
            self.state(),
            ConnectionState::Open | ConnectionState::Connecting
        ) {
            return;
        }
        info!(endpoint = %inner.endpoint, "Reconnecting chat WebSocket");
        self.start(&mut inner);
    }

    async fn on_opened(&self, generation: u64, tx: mpsc::UnboundedSender<Message>) -> bool {
        let mut inner = self.inner.lock().await;
        if !self.is_current(generation) {
            return false;
        }
        inner.outbound = Some(tx);
        info!(endpoint = %inner.endpoint, "Chat WebSocket connected");
        self.set_state(ConnectionState::Open);
        true
    }

    async fn on_closed(&self, generation: u64, error: Option<String>) {
        let mut inner = self.inner.lock().await;
        if !self.is_current(generation) {
            debug!(generation, "Ignoring close from superseded socket");
            return;
        }
        inner.outbound = None;
        if let Some(message) = error {
            warn!(endpoint = %inner.endpoint, error = %message, "Chat WebSocket error");
            let _ = self
                .events
                .send(ConnectionEvent::Error { generation, message });
        }
        self.set_state(ConnectionState::Closed);

        let manager = self.clone();
        inner
            .reconnect
            .schedule(self.reconnect_delay, manager.reconnect_now());
        debug!(
            delay_ms = self.reconnect_delay.as_millis() as u64,
            "Reconnect scheduled"
        );
    }

    async fn run_socket(self, generation: u64, endpoint: Url) {
        let ws = match connect_async(endpoint.as_str()).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                self.on_closed(generation, Some(format!("connect failed: {}", e)))
                    .await;
                return;
            }
        };

        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        if !self.on_opened(generation, tx).await {
            let _ = sink.send(Message::Close(None)).await;
            return;
        }

        let mut error = None;
        loop {
            tokio::select! {
                outgoing = rx.recv() => match outgoing {
                    Some(msg) => {
                        if let Err(e) = sink.send(msg).await {
                            error = Some(format!("send failed: {}", e));
                            break;
                        }
                    }
                    None => {
                        // Manual disconnect
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                },
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if !self.is_current(generation) {
                            return;
                        }
                        let _ = self.events.send(ConnectionEvent::Frame {
                            generation,
                            text: text.as_str().to_owned(),
                        });
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "Server closed chat WebSocket");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error = Some(e.to_string());
                        break;
                    }
                    None => break,
                },
            }
        }

        self.on_closed(generation, error).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_chat_endpoint_schemes() {
        let sid = SessionId::from("session-1-abcdefghi".to_string());

        let url = chat_endpoint(&Url::parse("http://localhost:8000").unwrap(), &sid).unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8000/api/ws/chat/session-1-abcdefghi"
        );

        let url = chat_endpoint(&Url::parse("https://example.com/app/").unwrap(), &sid).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://example.com/app/api/ws/chat/session-1-abcdefghi"
        );
    }

    #[test]
    fn test_chat_endpoint_rejects_other_schemes() {
        let sid = SessionId::generate();
        let err = chat_endpoint(&Url::parse("ftp://example.com").unwrap(), &sid).unwrap_err();
        assert!(matches!(err, ChatClientError::InvalidUrl(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once_after_delay() {
        let count = Arc::new(AtomicU32::new(0));
        let mut timer = ReconnectTimer::new();
        let c = count.clone();
        timer.schedule(Duration::from_millis(3000), async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timer.is_pending());

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!timer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduling_replaces_pending_timer() {
        let count = Arc::new(AtomicU32::new(0));
        let mut timer = ReconnectTimer::new();
        for _ in 0..3 {
            let c = count.clone();
            timer.schedule(Duration::from_millis(3000), async move {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let count = Arc::new(AtomicU32::new(0));
        let mut timer = ReconnectTimer::new();
        let c = count.clone();
        timer.schedule(Duration::from_millis(3000), async move {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(timer.cancel());
        assert!(!timer.cancel());
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_send_while_idle_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(
            Url::parse("ws://127.0.0.1:9/api/ws/chat/x").unwrap(),
            DEFAULT_RECONNECT_DELAY,
            tx,
        );
        assert_eq!(manager.state(), ConnectionState::Idle);
        let err = manager.send_text("{}".into()).await.unwrap_err();
        assert!(matches!(err, ChatClientError::NotConnected));
    }

    #[tokio::test]
    async fn test_disconnect_while_idle_reports_closed_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(
            Url::parse("ws://127.0.0.1:9/api/ws/chat/x").unwrap(),
            DEFAULT_RECONNECT_DELAY,
            tx,
        );
        manager.disconnect().await;
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(
            rx.try_recv().unwrap(),
            ConnectionEvent::StateChanged {
                generation: 1,
                state: ConnectionState::Closed
            }
        );
        assert!(rx.try_recv().is_err());
        assert!(!manager.reconnect_pending().await);
    }
}
