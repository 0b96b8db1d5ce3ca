//! ChatClient: stateful façade over one chat session
//!
//! Ties together the connection manager, the event interpreter, the transcript
//! and the upload client. All session state sits behind a single `RwLock`; every
//! inbound frame and every user command takes the write lock for exactly one
//! mutation, so observers never see a half-applied event.
//!
//! Architecture:
//! - The `ConnectionManager` owns the socket and forwards raw events over an mpsc channel
//! - A driver task consumes those events in order and applies them to `ChatState`
//! - Every applied change is broadcast as a `ChatNotification` on the `EventBus`

use super::config::ChatConfig;
use super::connection::{chat_endpoint, ConnectionEvent, ConnectionManager, ConnectionState};
use super::error::{ChatClientError, Result};
use super::interpreter;
use super::session::{ChatState, SessionId};
use super::transcript::{DeliveryState, Message, MessageId, Role};
use super::types::{AttachedFile, ClientCommand};
use super::upload::{AttachmentUploader, HttpUploader};
use crate::events::{ChatNotification, ErrorKind, EventBus, NotificationEmitter};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Client for one chat conversation at a time
///
/// Must be created inside a tokio runtime (it spawns its driver task).
pub struct ChatClient {
    config: ChatConfig,
    server_url: Url,
    connection: ConnectionManager,
    state: Arc<RwLock<ChatState>>,
    bus: EventBus,
    uploader: Arc<dyn AttachmentUploader>,
    driver: JoinHandle<()>,
}

impl ChatClient {
    pub fn new(config: ChatConfig) -> Result<Self> {
        let server_url = Url::parse(&config.server_url)?;
        let state = ChatState::new(config.default_model.clone());
        let endpoint = chat_endpoint(&server_url, &state.session_id)?;
        let uploader = Arc::new(HttpUploader::new(&server_url)?);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection = ConnectionManager::new(endpoint, config.reconnect_delay, events_tx);
        let state = Arc::new(RwLock::new(state));
        let bus = EventBus::default();
        let driver = tokio::spawn(drive(events_rx, state.clone(), bus.clone()));

        Ok(Self {
            config,
            server_url,
            connection,
            state,
            bus,
            uploader,
            driver,
        })
    }

    /// Replace the HTTP upload client
    pub fn with_uploader(mut self, uploader: Arc<dyn AttachmentUploader>) -> Self {
        self.uploader = uploader;
        self
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    // ========================================================================
    // Observable state
    // ========================================================================

    pub async fn session_id(&self) -> SessionId {
        self.state.read().await.session_id.clone()
    }

    /// Identifiers reported by the server in `init`
    pub async fn server_ids(&self) -> (Option<String>, Option<String>) {
        let state = self.state.read().await;
        (
            state.server_session_id.clone(),
            state.conversation_id.clone(),
        )
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_open()
    }

    pub async fn is_streaming(&self) -> bool {
        self.state.read().await.is_streaming
    }

    /// Snapshot of the transcript
    pub async fn messages(&self) -> Vec<Message> {
        self.state.read().await.transcript.messages().to_vec()
    }

    pub async fn message(&self, id: &str) -> Option<Message> {
        self.state.read().await.transcript.get(id).cloned()
    }

    pub async fn current_message_id(&self) -> Option<MessageId> {
        self.state
            .read()
            .await
            .transcript
            .current_id()
            .map(str::to_owned)
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state.read().await.last_error.clone()
    }

    pub async fn active_model(&self) -> String {
        self.state.read().await.active_model.clone()
    }

    /// Model sent with every following message
    pub async fn set_model(&self, model: impl Into<String>) {
        let model = model.into();
        debug!(model = %model, "Active model changed");
        self.state.write().await.active_model = model;
    }

    /// Subscribe to notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ChatNotification> {
        self.bus.subscribe()
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Open the session socket; no-op if already open or connecting
    pub async fn connect(&self) {
        let session_id = self.session_id().await;
        info!(session_id = %session_id, "Connecting chat client");
        self.connection.connect().await;
    }

    /// Wait until the socket is open, giving up after `timeout`
    pub async fn wait_connected(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.connection.watch_state();
        let opened = tokio::time::timeout(timeout, async {
            rx.wait_for(|s| *s == ConnectionState::Open)
                .await
                .map(|_| ())
        })
        .await;
        match opened {
            Ok(Ok(())) => Ok(()),
            _ => Err(ChatClientError::NotConnected),
        }
    }

    /// Close the socket and cancel any pending reconnect. Also ends the local
    /// streaming state since no further events can arrive.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
        let mut state = self.state.write().await;
        state.is_streaming = false;
        state.transcript.finish_current();
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Send a user message with optional attachments
    ///
    /// Rejected with `NotConnected` (transcript untouched) unless the socket is
    /// open. Otherwise the message is appended as pending before it is sent.
    pub async fn send_message(
        &self,
        content: impl Into<String>,
        files: Vec<AttachedFile>,
    ) -> Result<MessageId> {
        let content = content.into();
        if !self.connection.is_open() {
            return Err(self.record_send_error(ChatClientError::NotConnected).await);
        }

        let (message_id, frame) = {
            let mut state = self.state.write().await;
            let frame = ClientCommand::Message {
                content: content.clone(),
                model: state.active_model.clone(),
                files: files.iter().map(AttachedFile::to_ref).collect(),
            }
            .encode()?;
            let message_id = state.transcript.append(Message::user(content, files));
            (message_id, frame)
        };
        self.bus.emit(ChatNotification::MessageAppended {
            message_id: message_id.clone(),
            role: Role::User,
        });

        if let Err(e) = self.connection.send_text(frame).await {
            self.state.write().await.transcript.update_by_id(&message_id, |m| {
                if m.delivery == Some(DeliveryState::Pending) {
                    m.delivery = Some(DeliveryState::Failed);
                }
            });
            return Err(self.record_send_error(e).await);
        }

        debug!(message_id = %message_id, "User message sent");
        Ok(message_id)
    }

    /// Ask the server to stop the current stream
    ///
    /// The local streaming flag is cleared immediately, even when the cancel
    /// command cannot be sent. The current message stays current so trailing
    /// events still land on it.
    pub async fn cancel_stream(&self) -> Result<()> {
        let message_id = {
            let mut state = self.state.write().await;
            state.is_streaming = false;
            state.transcript.update_current(|m| m.is_streaming = false);
            state.transcript.current_id().map(str::to_owned)
        };
        self.bus
            .emit(ChatNotification::StreamCancelled { message_id });

        let frame = ClientCommand::Cancel.encode()?;
        self.connection.send_text(frame).await.map_err(|e| {
            debug!(error = %e, "Cancel not transmitted");
            e
        })
    }

    /// Empty the transcript and forget the current message
    pub async fn clear_messages(&self) {
        self.state.write().await.transcript.clear();
        self.bus.emit(ChatNotification::TranscriptCleared);
    }

    /// Start a fresh conversation under a new session id
    ///
    /// The transcript is cleared and, if a connection was active (or about to
    /// reconnect), a new socket is opened for the new session.
    pub async fn new_session(&self) -> Result<SessionId> {
        let was_active = matches!(
            self.connection.state(),
            ConnectionState::Open | ConnectionState::Connecting
        ) || self.connection.reconnect_pending().await;

        self.connection.disconnect().await;
        let session_id = {
            let mut state = self.state.write().await;
            let session_id = state.reset().clone();
            // Anything the old socket already queued is dropped by the driver
            state.min_generation = self.connection.generation() + 1;
            session_id
        };
        let endpoint = chat_endpoint(&self.server_url, &session_id)?;
        self.connection.set_endpoint(endpoint).await;

        info!(session_id = %session_id, reconnect = was_active, "New chat session");
        self.bus.emit(ChatNotification::SessionReset {
            session_id: session_id.to_string(),
        });

        if was_active {
            self.connection.connect().await;
        }
        Ok(session_id)
    }

    // ========================================================================
    // Attachments
    // ========================================================================

    /// Upload a file and queue it for the next message
    pub async fn upload_attachment(&self, path: &Path) -> Result<AttachedFile> {
        let session_id = self.session_id().await;
        let file = self.uploader.upload(path, session_id.as_str()).await?;
        self.state
            .write()
            .await
            .pending_attachments
            .push(file.clone());
        Ok(file)
    }

    /// Files uploaded since the last call
    pub async fn pending_attachments(&self) -> Vec<AttachedFile> {
        self.state.read().await.pending_attachments.clone()
    }

    /// Drain the pending attachments
    pub async fn take_attachments(&self) -> Vec<AttachedFile> {
        std::mem::take(&mut self.state.write().await.pending_attachments)
    }

    async fn record_send_error(&self, err: ChatClientError) -> ChatClientError {
        let message = err.to_string();
        warn!(error = %message, "Chat message not sent");
        self.state.write().await.last_error = Some(message.clone());
        self.bus.emit_error(ErrorKind::Send, message);
        err
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.driver.abort();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let connection = self.connection.clone();
            handle.spawn(async move { connection.disconnect().await });
        }
    }
}

/// Apply connection events to the session state, in arrival order
async fn drive(
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    state: Arc<RwLock<ChatState>>,
    bus: EventBus,
) {
    while let Some(event) = events.recv().await {
        let notification = {
            let mut state = state.write().await;
            apply_connection_event(&mut state, event)
        };
        if let Some(notification) = notification {
            bus.emit(notification);
        }
    }
}

/// Fold one connection event into the session state
///
/// Events from a generation older than `state.min_generation` were queued by
/// the previous session's socket: frames and errors are dropped, and a stale
/// close still reports the state change but leaves pending messages alone.
fn apply_connection_event(
    state: &mut ChatState,
    event: ConnectionEvent,
) -> Option<ChatNotification> {
    let live = event.generation() >= state.min_generation;
    match event {
        ConnectionEvent::StateChanged {
            state: conn_state, ..
        } => {
            if live && conn_state == ConnectionState::Closed {
                let failed = state.transcript.settle_pending(DeliveryState::Failed);
                if failed > 0 {
                    warn!(count = failed, "Connection closed before delivery");
                }
            }
            Some(ChatNotification::ConnectionChanged { state: conn_state })
        }
        ConnectionEvent::Frame { generation, text } => {
            if !live {
                debug!(generation, "Dropping frame from a previous session");
                return None;
            }
            interpreter::handle_frame(state, &text)
        }
        ConnectionEvent::Error { message, .. } => {
            if !live {
                return None;
            }
            state.last_error = Some(message.clone());
            Some(ChatNotification::Error {
                kind: ErrorKind::Connection,
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FakeUploader;

    #[async_trait]
    impl AttachmentUploader for FakeUploader {
        async fn upload(&self, path: &Path, session_id: &str) -> Result<AttachedFile> {
            Ok(AttachedFile {
                id: format!("{}:{}", session_id, path.display()),
                name: path.display().to_string(),
                file_type: "text".into(),
                mime_type: "text/plain".into(),
                size: 1,
                text_preview: None,
                metadata: None,
            })
        }
    }

    fn client() -> ChatClient {
        ChatClient::new(ChatConfig::default().with_server_url("http://127.0.0.1:9")).unwrap()
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_rejected() {
        let client = client();
        let mut rx = client.subscribe();

        let err = client.send_message("hello", vec![]).await.unwrap_err();
        assert!(matches!(err, ChatClientError::NotConnected));
        assert!(client.messages().await.is_empty());
        assert!(client.last_error().await.is_some());

        match rx.recv().await.unwrap() {
            ChatNotification::Error { kind, .. } => assert_eq!(kind, ErrorKind::Send),
            other => panic!("unexpected notification: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_while_disconnected_clears_flag() {
        let client = client();
        {
            let mut state = client.state.write().await;
            interpreter::apply_event(
                &mut state,
                crate::chat::types::ServerEvent::StreamStart {
                    model: None,
                    model_name: None,
                },
            );
        }
        assert!(client.is_streaming().await);
        let current = client.current_message_id().await;

        assert!(client.cancel_stream().await.is_err());
        assert!(!client.is_streaming().await);
        assert_eq!(client.current_message_id().await, current);
        let msg = client.message(current.as_deref().unwrap()).await.unwrap();
        assert!(!msg.is_streaming);
    }

    #[tokio::test]
    async fn test_clear_messages() {
        let client = client();
        {
            let mut state = client.state.write().await;
            state.transcript.append(Message::user("hi", vec![]));
            state
                .transcript
                .start_current(Message::assistant_streaming(None, None));
        }
        client.clear_messages().await;
        assert!(client.messages().await.is_empty());
        assert!(client.current_message_id().await.is_none());
    }

    #[tokio::test]
    async fn test_new_session_while_idle_does_not_connect() {
        let client = client();
        let before = client.session_id().await;
        let after = client.new_session().await.unwrap();
        assert_ne!(before, after);
        assert_eq!(client.session_id().await, after);
        assert!(client
            .connection
            .endpoint()
            .await
            .as_str()
            .ends_with(after.as_str()));
        assert_ne!(client.connection_state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_upload_queues_attachment() {
        let client = client().with_uploader(Arc::new(FakeUploader));
        let file = client
            .upload_attachment(Path::new("notes.txt"))
            .await
            .unwrap();
        assert!(file.id.starts_with("session-"));
        assert_eq!(client.pending_attachments().await.len(), 1);

        let taken = client.take_attachments().await;
        assert_eq!(taken, vec![file]);
        assert!(client.pending_attachments().await.is_empty());
    }

    #[tokio::test]
    async fn test_set_model() {
        let client = client();
        client.set_model("m-large").await;
        assert_eq!(client.active_model().await, "m-large");
    }

    fn state_after_reset() -> ChatState {
        let mut state = ChatState::new("m-small");
        state.min_generation = 2;
        state
    }

    #[test]
    fn test_frame_from_previous_session_is_dropped() {
        let mut state = state_after_reset();
        let frame = r#"{"type":"stream_start","model":"m-small","model_name":"Small"}"#;

        let stale = ConnectionEvent::Frame {
            generation: 1,
            text: frame.into(),
        };
        assert!(apply_connection_event(&mut state, stale).is_none());
        assert!(state.transcript.messages().is_empty());
        assert!(!state.is_streaming);

        let live = ConnectionEvent::Frame {
            generation: 2,
            text: frame.into(),
        };
        assert!(apply_connection_event(&mut state, live).is_some());
        assert!(state.is_streaming);
        assert_eq!(state.transcript.messages().len(), 1);
    }

    #[test]
    fn test_close_from_previous_session_keeps_pending() {
        let mut state = state_after_reset();
        let id = state.transcript.append(Message::user("hi", vec![]));

        let stale = ConnectionEvent::StateChanged {
            generation: 1,
            state: ConnectionState::Closed,
        };
        assert_eq!(
            apply_connection_event(&mut state, stale),
            Some(ChatNotification::ConnectionChanged {
                state: ConnectionState::Closed
            })
        );
        assert_eq!(
            state.transcript.get(&id).unwrap().delivery,
            Some(DeliveryState::Pending)
        );

        let live = ConnectionEvent::StateChanged {
            generation: 3,
            state: ConnectionState::Closed,
        };
        apply_connection_event(&mut state, live);
        assert_eq!(
            state.transcript.get(&id).unwrap().delivery,
            Some(DeliveryState::Failed)
        );
    }

    #[test]
    fn test_error_from_previous_session_is_dropped() {
        let mut state = state_after_reset();
        let stale = ConnectionEvent::Error {
            generation: 0,
            message: "connection reset".into(),
        };
        assert!(apply_connection_event(&mut state, stale).is_none());
        assert!(state.last_error.is_none());

        let live = ConnectionEvent::Error {
            generation: 2,
            message: "connection reset".into(),
        };
        assert!(matches!(
            apply_connection_event(&mut state, live),
            Some(ChatNotification::Error {
                kind: ErrorKind::Connection,
                ..
            })
        ));
        assert_eq!(state.last_error.as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn test_new_session_raises_generation_floor() {
        let client = client();
        client.new_session().await.unwrap();
        let floor = client.state.read().await.min_generation;
        assert_eq!(floor, client.connection.generation() + 1);
    }

    #[test]
    fn test_invalid_server_url() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = rt.enter();
        let err = ChatClient::new(ChatConfig::default().with_server_url("not a url"))
            .err()
            .unwrap();
        assert!(matches!(err, ChatClientError::InvalidUrl(_)));
    }
}
