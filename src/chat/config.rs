//! Chat configuration

use super::connection::DEFAULT_RECONNECT_DELAY;
use std::time::Duration;

/// Default chat backend
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000";

/// Default model sent with outbound messages
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Configuration for the chat client
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// HTTP base URL of the backend; the WebSocket URL is derived from it
    pub server_url: String,
    /// Model used when the user has not picked one
    pub default_model: String,
    /// Fixed delay between an unexpected close and the reconnect attempt
    pub reconnect_delay: Duration,
}

impl ChatConfig {
    pub fn with_server_url(mut self, server_url: impl Into<String>) -> Self {
        self.server_url = server_url.into();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.into(),
            default_model: DEFAULT_MODEL.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}
