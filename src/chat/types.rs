//! Wire-level chat events, commands and attachment records

use serde::{Deserialize, Serialize};

/// Tool call announced by the server in a `tool_use` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUsePayload {
    pub id: String,
    pub name: String,
    /// Opaque tool parameters
    #[serde(default)]
    pub input: serde_json::Value,
}

/// Outcome of a tool call delivered in a `tool_result` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultPayload {
    pub id: String,
    #[serde(default)]
    pub output: serde_json::Value,
    /// "completed" or "error" (absent means completed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Events pushed by the server over the chat WebSocket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection accepted: server-side identifiers for this conversation
    Init {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
    },
    /// The backend routed the conversation to another model
    ModelSwitch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_model: Option<String>,
        to_model: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_model_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_model_name: Option<String>,
    },
    /// A new assistant turn begins
    StreamStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_name: Option<String>,
    },
    /// Streaming text token(s)
    TextDelta { content: String },
    /// The assistant is calling a tool
    ToolUse { tool: ToolUsePayload },
    /// Result of an earlier tool call
    ToolResult { tool: ToolResultPayload },
    /// The assistant turn is finished
    StreamEnd,
    /// Server-side failure for the current turn
    Error {
        #[serde(default)]
        message: String,
    },
    /// Any tag this client does not know about
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Get the wire tag of this event
    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::Init { .. } => "init",
            ServerEvent::ModelSwitch { .. } => "model_switch",
            ServerEvent::StreamStart { .. } => "stream_start",
            ServerEvent::TextDelta { .. } => "text_delta",
            ServerEvent::ToolUse { .. } => "tool_use",
            ServerEvent::ToolResult { .. } => "tool_result",
            ServerEvent::StreamEnd => "stream_end",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Unknown => "unknown",
        }
    }
}

/// Reference to an uploaded file, as carried in an outbound `message`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub id: String,
    pub name: String,
    pub mime_type: String,
}

/// Commands sent from the client to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// A new user message
    Message {
        content: String,
        model: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        files: Vec<FileRef>,
    },
    /// Stop the assistant turn in progress
    Cancel,
}

impl ClientCommand {
    /// Serialize to the JSON text frame sent over the socket
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A file uploaded to the backend and attachable to a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachedFile {
    pub id: String,
    pub name: String,
    /// Coarse category assigned by the backend (e.g. "image", "document")
    #[serde(rename = "type", default)]
    pub file_type: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl AttachedFile {
    pub fn to_ref(&self) -> FileRef {
        FileRef {
            id: self.id.clone(),
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

/// Envelope returned by `POST /api/chat/upload`
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub status: String,
    #[serde(default)]
    pub file: Option<AttachedFile>,
    #[serde(default)]
    pub message: Option<String>,
}
