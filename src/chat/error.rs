//! Error type for chat client operations

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatClientError {
    /// A command was issued while the socket is not open. Non-fatal.
    #[error("not connected to chat server")]
    NotConnected,

    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),

    /// The upload endpoint rejected the file or answered with an unexpected envelope
    #[error("upload failed: {0}")]
    Upload(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid server url: {0}")]
    InvalidUrl(String),
}

impl From<url::ParseError> for ChatClientError {
    fn from(err: url::ParseError) -> Self {
        ChatClientError::InvalidUrl(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatClientError>;
