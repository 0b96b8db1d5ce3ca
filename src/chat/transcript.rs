//! Ordered chat messages with an explicit current message
//!
//! Messages are kept strictly in insertion order. The "current" message is the
//! single assistant message receiving streamed content; it is tracked by id,
//! never by reference, so every streaming mutation goes through a lookup that
//! can fail (and then is a no-op).

use super::types::AttachedFile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque message identity
pub type MessageId = String;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Distinguishes real chat turns from synthetic dividers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Chat,
    /// Marker inserted when the backend switches model mid-conversation
    ModelSwitch,
}

/// Lifecycle of a tool call: `Running` moves once to `Completed` or `Error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Running,
    Completed,
    Error,
}

impl ToolStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, ToolStatus::Running)
    }
}

/// One tool call made by the assistant, owned by its message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    pub status: ToolStatus,
}

impl ToolInvocation {
    pub fn running(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
            output: None,
            status: ToolStatus::Running,
        }
    }

    /// Record the result. Returns `false` (and changes nothing) if the
    /// invocation already finished.
    pub fn finish(&mut self, output: serde_json::Value, status: ToolStatus) -> bool {
        if self.status.is_finished() || !status.is_finished() {
            return false;
        }
        self.output = Some(output);
        self.status = status;
        true
    }
}

/// Reconciliation state of an optimistically appended user message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Appended locally, server has not started answering yet
    Pending,
    /// The server started a stream after this message was sent
    Delivered,
    /// The connection dropped (or the frame could not be queued) while pending
    Failed,
}

/// A single transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub kind: MessageKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolInvocation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<AttachedFile>,
    pub is_streaming: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    /// Only set on user messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryState>,
}

impl Message {
    fn base(role: Role, kind: MessageKind, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            kind,
            content,
            tools: Vec::new(),
            files: Vec::new(),
            is_streaming: false,
            created_at: Utc::now(),
            model: None,
            model_name: None,
            delivery: None,
        }
    }

    /// A provisional user message, appended before the server acknowledges it
    pub fn user(content: impl Into<String>, files: Vec<AttachedFile>) -> Self {
        let mut msg = Self::base(Role::User, MessageKind::Chat, content.into());
        msg.files = files;
        msg.delivery = Some(DeliveryState::Pending);
        msg
    }

    /// An empty assistant message that will receive streamed content
    pub fn assistant_streaming(model: Option<String>, model_name: Option<String>) -> Self {
        let mut msg = Self::base(Role::Assistant, MessageKind::Chat, String::new());
        msg.is_streaming = true;
        msg.model = model;
        msg.model_name = model_name;
        msg
    }

    /// Divider announcing that the conversation continues on another model
    pub fn model_divider(model: impl Into<String>, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        let mut msg = Self::base(
            Role::Assistant,
            MessageKind::ModelSwitch,
            format!("Switched to {}", display_name),
        );
        msg.model = Some(model.into());
        msg.model_name = Some(display_name);
        msg
    }

    pub fn tool(&self, id: &str) -> Option<&ToolInvocation> {
        self.tools.iter().find(|t| t.id == id)
    }

    pub fn tool_mut(&mut self, id: &str) -> Option<&mut ToolInvocation> {
        self.tools.iter_mut().find(|t| t.id == id)
    }
}

/// Ordered message list for one session
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    current: Option<MessageId>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append at the end, returning the message id
    pub fn append(&mut self, message: Message) -> MessageId {
        let id = message.id.clone();
        self.messages.push(message);
        id
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Apply `f` to the message with the given id. Returns whether it was found.
    pub fn update_by_id<F>(&mut self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(msg) => {
                f(msg);
                true
            }
            None => false,
        }
    }

    /// Drop all messages and the current pointer
    pub fn clear(&mut self) {
        self.messages.clear();
        self.current = None;
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn current(&self) -> Option<&Message> {
        self.current.as_deref().and_then(|id| self.get(id))
    }

    /// Apply `f` to the current message, if there is one and it still exists
    pub fn update_current<F>(&mut self, f: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        let Some(id) = self.current.clone() else {
            return false;
        };
        self.update_by_id(&id, f)
    }

    /// Append `message` and make it the current message
    pub fn start_current(&mut self, message: Message) -> MessageId {
        let id = self.append(message);
        self.current = Some(id.clone());
        id
    }

    /// Clear the streaming flag on the current message and forget it
    pub fn finish_current(&mut self) -> Option<MessageId> {
        let id = self.current.take()?;
        self.update_by_id(&id, |m| m.is_streaming = false);
        Some(id)
    }

    /// Number of messages currently flagged as streaming
    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_streaming).count()
    }

    /// Move every pending user message to `state`. Returns how many changed.
    pub fn settle_pending(&mut self, state: DeliveryState) -> usize {
        let mut changed = 0;
        for msg in self
            .messages
            .iter_mut()
            .filter(|m| m.delivery == Some(DeliveryState::Pending))
        {
            msg.delivery = Some(state);
            changed += 1;
        }
        changed
    }
}
