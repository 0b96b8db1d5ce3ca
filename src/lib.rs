//! Chat Session Client
//!
//! Client side of a streaming AI chat assistant:
//! - Session-scoped WebSocket connection with a fixed-delay reconnect
//! - Event interpreter folding streamed server events into a transcript
//! - Attachment uploads over REST
//! - Persisted user preferences

pub mod chat;
pub mod events;
pub mod preferences;

use anyhow::Result;
use chat::ChatConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: ServerYamlConfig,
    pub chat: ChatYamlConfig,
}

/// Chat backend section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerYamlConfig {
    pub url: String,
}

impl Default for ServerYamlConfig {
    fn default() -> Self {
        Self {
            url: chat::config::DEFAULT_SERVER_URL.into(),
        }
    }
}

/// Chat client section
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ChatYamlConfig {
    pub default_model: Option<String>,
    pub reconnect_delay_ms: Option<u64>,
    pub preferences_path: Option<PathBuf>,
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub chat: ChatConfig,
    pub preferences_path: PathBuf,
}

impl ClientConfig {
    /// Load configuration from environment variables only.
    /// Equivalent to from_yaml_and_env(None).
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "config.yaml" in CWD. If the file doesn't
    /// exist, falls back to pure env var / defaults.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        // 1. Load YAML config (or defaults if file not found)
        let yaml = Self::load_yaml(yaml_path);
        let defaults = ChatConfig::default();

        // 2. Build config with env var overrides
        let reconnect_delay = std::env::var("CHAT_RECONNECT_DELAY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .or(yaml.chat.reconnect_delay_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.reconnect_delay);

        Ok(Self {
            chat: ChatConfig {
                server_url: std::env::var("CHAT_SERVER_URL").unwrap_or(yaml.server.url),
                default_model: std::env::var("CHAT_DEFAULT_MODEL")
                    .ok()
                    .or(yaml.chat.default_model)
                    .unwrap_or(defaults.default_model),
                reconnect_delay,
            },
            preferences_path: std::env::var("CHAT_PREFERENCES_PATH")
                .ok()
                .map(PathBuf::from)
                .or(yaml.chat.preferences_path)
                .unwrap_or_else(preferences::PreferencesStore::default_path),
        })
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_yaml_config_loading() {
        let yaml = r#"
server:
  url: https://chat.example.com

chat:
  default_model: m-large
  reconnect_delay_ms: 500
  preferences_path: /tmp/prefs.json
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.url, "https://chat.example.com");
        assert_eq!(config.chat.default_model.as_deref(), Some("m-large"));
        assert_eq!(config.chat.reconnect_delay_ms, Some(500));
        assert_eq!(
            config.chat.preferences_path,
            Some(PathBuf::from("/tmp/prefs.json"))
        );
    }

    #[test]
    fn test_yaml_defaults() {
        let config = YamlConfig::default();
        assert_eq!(config.server.url, "http://localhost:8000");
        assert!(config.chat.default_model.is_none());
        assert!(config.chat.reconnect_delay_ms.is_none());
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
chat:
  default_model: m-small
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.url, "http://localhost:8000");
        assert_eq!(config.chat.default_model.as_deref(), Some("m-small"));
    }

    /// Combined test for YAML file loading and env var overrides.
    /// Runs as a single test to avoid parallel env var race conditions.
    #[test]
    fn test_yaml_and_env_lifecycle() {
        // Helper to clear all config env vars
        fn clear_env() {
            for var in &[
                "CHAT_SERVER_URL",
                "CHAT_DEFAULT_MODEL",
                "CHAT_RECONNECT_DELAY_MS",
                "CHAT_PREFERENCES_PATH",
            ] {
                std::env::remove_var(var);
            }
        }

        // --- Phase 1: YAML values loaded correctly ---
        let yaml = r#"
server:
  url: http://yaml-host:9000
chat:
  default_model: yaml-model
  reconnect_delay_ms: 1500
"#;
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&file_path).unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        clear_env();

        let config = ClientConfig::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.chat.server_url, "http://yaml-host:9000");
        assert_eq!(config.chat.default_model, "yaml-model");
        assert_eq!(config.chat.reconnect_delay, Duration::from_millis(1500));
        assert!(config.preferences_path.ends_with("preferences.json"));

        // --- Phase 2: Env vars override YAML ---
        std::env::set_var("CHAT_SERVER_URL", "https://env-host");
        std::env::set_var("CHAT_RECONNECT_DELAY_MS", "250");
        std::env::set_var("CHAT_PREFERENCES_PATH", "/tmp/env-prefs.json");

        let config = ClientConfig::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.chat.server_url, "https://env-host");
        assert_eq!(config.chat.reconnect_delay, Duration::from_millis(250));
        assert_eq!(
            config.preferences_path,
            PathBuf::from("/tmp/env-prefs.json")
        );
        // YAML value still used where no env override
        assert_eq!(config.chat.default_model, "yaml-model");

        // Unparsable delay falls back to YAML
        std::env::set_var("CHAT_RECONNECT_DELAY_MS", "soon");
        let config = ClientConfig::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.chat.reconnect_delay, Duration::from_millis(1500));

        clear_env();

        // --- Phase 3: No YAML file → defaults ---
        let nonexistent = Path::new("/tmp/nonexistent-config-12345.yaml");
        let config = ClientConfig::from_yaml_and_env(Some(nonexistent)).unwrap();
        assert_eq!(config.chat.server_url, "http://localhost:8000");
        assert_eq!(config.chat.reconnect_delay, Duration::from_millis(3000));
    }
}
