//! Persisted user preferences
//!
//! A small JSON document holding the choices that should survive a restart.
//! Loading never fails: a missing file yields defaults, a corrupt one yields
//! defaults plus a warning, and missing fields fall back to their defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Application directory name under the platform config dir
const APP_DIR: &str = "chat-session-client";
const FILE_NAME: &str = "preferences.json";

/// How the assistant is asked to behave
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    /// Assistant may call tools
    #[default]
    Agent,
    /// Plain conversation
    Chat,
}

impl std::str::FromStr for ChatMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "agent" => Ok(Self::Agent),
            "chat" => Ok(Self::Chat),
            other => anyhow::bail!("unknown chat mode: {} (expected agent or chat)", other),
        }
    }
}

/// Persisted preferences
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Model picked by the user; `None` means the configured default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_model: Option<String>,
    pub mode: ChatMode,
}

/// File-backed preferences container
#[derive(Debug, Clone)]
pub struct PreferencesStore {
    path: PathBuf,
    current: Preferences,
}

impl PreferencesStore {
    /// `<config_dir>/chat-session-client/preferences.json`
    pub fn default_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| {
            PathBuf::from(std::env::var("HOME").unwrap_or_default()).join(".config")
        });
        config_dir.join(APP_DIR).join(FILE_NAME)
    }

    /// Load preferences from `path`, falling back to defaults
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Preferences>(&contents) {
                Ok(prefs) => {
                    debug!(path = %path.display(), "Loaded preferences");
                    prefs
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt preferences file, using defaults");
                    Preferences::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Preferences::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable preferences file, using defaults");
                Preferences::default()
            }
        };
        Self { path, current }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> &Preferences {
        &self.current
    }

    /// Mutate and persist
    pub fn update<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Preferences),
    {
        f(&mut self.current);
        self.save()
    }

    /// Write atomically: temp file in the same directory, then rename
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create preferences dir {}", parent.display())
                })?;
            }
        }

        let json = serde_json::to_string_pretty(&self.current)
            .context("Failed to serialize preferences")?;
        let tmp_path = self.path.with_extension("json.tmp");
        let mut tmp_file = File::create(&tmp_path)
            .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
        tmp_file.write_all(json.as_bytes())?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        debug!(path = %self.path.display(), "Preferences saved");
        Ok(())
    }
}
