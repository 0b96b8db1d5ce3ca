//! Client-side notification types

use crate::chat::connection::ConnectionState;
use crate::chat::transcript::{Role, ToolStatus};
use serde::{Deserialize, Serialize};

/// Which layer an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Socket failed to open, or dropped unexpectedly
    Connection,
    /// Server-sent `error` event
    Server,
    /// A command could not be sent (e.g. not connected)
    Send,
}

/// A change observers may want to react to
///
/// Must be Clone for `tokio::sync::broadcast`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatNotification {
    ConnectionChanged {
        state: ConnectionState,
    },
    /// Server-side identifiers received in `init`
    SessionInitialized {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
    },
    /// A new conversation replaced the old one
    SessionReset {
        session_id: String,
    },
    MessageAppended {
        message_id: String,
        role: Role,
    },
    ModelSwitched {
        message_id: String,
        model: String,
        display_name: String,
    },
    StreamStarted {
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_name: Option<String>,
    },
    TextAppended {
        message_id: String,
        delta: String,
    },
    ToolStarted {
        message_id: String,
        tool_id: String,
        name: String,
    },
    ToolFinished {
        message_id: String,
        tool_id: String,
        status: ToolStatus,
    },
    StreamFinished {
        message_id: String,
    },
    /// Local streaming flag cleared by a user cancel
    StreamCancelled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    TranscriptCleared,
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl ChatNotification {
    /// Get the notification name (used for logging)
    pub fn notification_type(&self) -> &'static str {
        match self {
            ChatNotification::ConnectionChanged { .. } => "connection_changed",
            ChatNotification::SessionInitialized { .. } => "session_initialized",
            ChatNotification::SessionReset { .. } => "session_reset",
            ChatNotification::MessageAppended { .. } => "message_appended",
            ChatNotification::ModelSwitched { .. } => "model_switched",
            ChatNotification::StreamStarted { .. } => "stream_started",
            ChatNotification::TextAppended { .. } => "text_appended",
            ChatNotification::ToolStarted { .. } => "tool_started",
            ChatNotification::ToolFinished { .. } => "tool_finished",
            ChatNotification::StreamFinished { .. } => "stream_finished",
            ChatNotification::StreamCancelled { .. } => "stream_cancelled",
            ChatNotification::TranscriptCleared => "transcript_cleared",
            ChatNotification::Error { .. } => "error",
        }
    }
}

/// Sink for chat notifications
///
/// Emitting is fire-and-forget: it never blocks and never fails.
pub trait NotificationEmitter: Send + Sync {
    fn emit(&self, notification: ChatNotification);

    fn emit_error(&self, kind: ErrorKind, message: impl Into<String>)
    where
        Self: Sized,
    {
        self.emit(ChatNotification::Error {
            kind,
            message: message.into(),
        });
    }
}
