//! Configuration management for streamkeeper.
//!
//! [`Config`] is the typed view; [`SettingsStore`] is the opaque key/value
//! contract front ends use to persist it. Connection credentials are never
//! interpreted here.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
#[cfg(feature = "toml")]
use std::path::Path;

/// Settings key for the server address.
pub const KEY_SERVER_PORT: &str = "server.port";
/// Settings key for the server user.
pub const KEY_SERVER_USER: &str = "server.user";
/// Settings key for the client workspace name.
pub const KEY_SERVER_CLIENT: &str = "server.client";
/// Settings key for the snapshot storage path.
pub const KEY_HISTORY_STORAGE_PATH: &str = "history.storage_path";
/// Settings key for the last stream opened.
pub const KEY_LAST_STREAM: &str = "session.last_stream";

/// Default location of snapshot files, relative to the hierarchy root.
pub const DEFAULT_HISTORY_STORAGE_PATH: &str = ".streamkeeper";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Server connection descriptor, passed through to the adapter untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub client: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Depot-absolute (`//...`) or relative to the hierarchy root
    #[serde(default = "default_storage_path")]
    pub storage_path: String,
    /// Record stream parents in snapshots
    #[serde(default = "default_track_parents")]
    pub track_parents: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub last_stream: Option<String>,
}

fn default_storage_path() -> String {
    DEFAULT_HISTORY_STORAGE_PATH.to_string()
}

fn default_track_parents() -> bool {
    true
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            track_parents: default_track_parents(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl Config {
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "toml")]
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        tracing::debug!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    pub fn default_config() -> Self {
        Self {
            server: ServerConfig::default(),
            history: HistoryConfig::default(),
            session: SessionConfig::default(),
        }
    }

    /// Reject settings the publish protocol cannot use.
    pub fn validate(&self) -> Result<()> {
        let storage = self.history.storage_path.trim();
        if storage.is_empty() {
            return Err(Error::Config("history.storage_path is empty".to_string()));
        }
        if storage.split('/').any(|segment| segment == "..") {
            return Err(Error::Config(format!(
                "history.storage_path must not climb out of the stream: {}",
                storage
            )));
        }
        Ok(())
    }
}

/// Opaque read/write settings contract.
pub trait SettingsStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

impl SettingsStore for Config {
    fn get(&self, key: &str) -> Option<String> {
        match key {
            KEY_SERVER_PORT => Some(self.server.port.clone()),
            KEY_SERVER_USER => Some(self.server.user.clone()),
            KEY_SERVER_CLIENT => Some(self.server.client.clone()),
            KEY_HISTORY_STORAGE_PATH => Some(self.history.storage_path.clone()),
            KEY_LAST_STREAM => self.session.last_stream.clone(),
            _ => None,
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            KEY_SERVER_PORT => self.server.port = value.to_string(),
            KEY_SERVER_USER => self.server.user = value.to_string(),
            KEY_SERVER_CLIENT => self.server.client = value.to_string(),
            KEY_HISTORY_STORAGE_PATH => self.history.storage_path = value.to_string(),
            KEY_LAST_STREAM => self.session.last_stream = Some(value.to_string()),
            other => return Err(Error::Config(format!("unknown settings key: {}", other))),
        }
        Ok(())
    }
}
