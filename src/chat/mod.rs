//! Chat module: client side of a streaming chat session
//!
//! Opens a session-scoped WebSocket to the chat backend, sends user messages
//! and cancel requests, and folds the server's streamed events into an ordered
//! transcript. Attachments are uploaded over REST.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod interpreter;
pub mod session;
pub mod transcript;
pub mod types;
pub mod upload;

pub use client::ChatClient;
pub use config::ChatConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use error::{ChatClientError, Result};
pub use session::{ChatState, SessionId};
pub use transcript::{
    DeliveryState, Message, MessageId, MessageKind, Role, ToolInvocation, ToolStatus, Transcript,
};
pub use types::{AttachedFile, ClientCommand, ServerEvent};
pub use upload::{AttachmentUploader, HttpUploader};
