//! Session identity and the mutable state owned by one chat session

use super::transcript::Transcript;
use super::types::AttachedFile;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Client-generated token scoping one WebSocket connection to one server-side
/// conversation. Shape: `session-<unix-millis>-<9 random chars>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let random = Uuid::new_v4().simple().to_string();
        Self(format!("session-{}-{}", millis, &random[..9]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Everything one conversation mutates: identifiers, transcript, flags
#[derive(Debug, Clone)]
pub struct ChatState {
    pub session_id: SessionId,
    /// Identifiers reported by the server in `init`
    pub server_session_id: Option<String>,
    pub conversation_id: Option<String>,
    pub transcript: Transcript,
    /// Session-level streaming flag (cleared optimistically on cancel)
    pub is_streaming: bool,
    pub last_error: Option<String>,
    /// Model id sent with every outbound message
    pub active_model: String,
    /// Uploaded files waiting to be attached to the next message
    pub pending_attachments: Vec<AttachedFile>,
    /// Connection events from socket generations below this belong to an
    /// earlier session and must not touch this one
    pub min_generation: u64,
}

impl ChatState {
    pub fn new(active_model: impl Into<String>) -> Self {
        Self {
            session_id: SessionId::generate(),
            server_session_id: None,
            conversation_id: None,
            transcript: Transcript::new(),
            is_streaming: false,
            last_error: None,
            active_model: active_model.into(),
            pending_attachments: Vec::new(),
            min_generation: 0,
        }
    }

    /// Start a new conversation: fresh session id, empty transcript.
    /// The active model is kept. `min_generation` is left to the caller,
    /// which knows the connection's generation.
    pub fn reset(&mut self) -> &SessionId {
        self.session_id = SessionId::generate();
        self.server_session_id = None;
        self.conversation_id = None;
        self.transcript.clear();
        self.is_streaming = false;
        self.last_error = None;
        self.pending_attachments.clear();
        &self.session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::transcript::Message;

    #[test]
    fn test_session_id_shape() {
        let id = SessionId::generate();
        let parts: Vec<&str> = id.as_str().splitn(3, '-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "session");
        assert!(parts[1].parse::<i64>().is_ok(), "timestamp part: {}", parts[1]);
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_session_ids_differ() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn test_reset_clears_conversation_but_keeps_model() {
        let mut state = ChatState::new("m1");
        let old = state.session_id.clone();
        state.conversation_id = Some("conv-1".into());
        state.is_streaming = true;
        state.last_error = Some("x".into());
        state.transcript.append(Message::user("hi", vec![]));

        let new_id = state.reset().clone();
        assert_ne!(new_id, old);
        assert!(state.transcript.is_empty());
        assert!(state.conversation_id.is_none());
        assert!(!state.is_streaming);
        assert!(state.last_error.is_none());
        assert_eq!(state.active_model, "m1");
    }
}
