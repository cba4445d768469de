//! Session layer configuration types.
//!
//! `chatsync-session` and the `chatsync` daemon read `chatsync.toml` using
//! these types. Every field has a serde default so a missing or partial file
//! yields a usable configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Canonical config file name.
pub const CONFIG_FILE_NAME: &str = "chatsync.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("could not determine a config directory for this platform")]
    NoConfigDir,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration (persisted as `chatsync.toml`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub throttle: ThrottleSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_url")]
    pub url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: default_server_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Consecutive "chat switch" answers tolerated within one sync.
    #[serde(default = "default_max_chat_switch_hops")]
    pub max_chat_switch_hops: u32,
    #[serde(default = "default_notice_capacity")]
    pub notice_capacity: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            max_chat_switch_hops: default_max_chat_switch_hops(),
            notice_capacity: default_notice_capacity(),
        }
    }
}

impl SyncSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Minimum spacing between completions of the same request key, in ms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleSettings {
    #[serde(default = "default_history_ms")]
    pub history_ms: u64,
    #[serde(default = "default_list_chats_ms")]
    pub list_chats_ms: u64,
    #[serde(default)]
    pub parent_lookup_ms: u64,
    #[serde(default = "default_mutation_ms")]
    pub mutation_ms: u64,
    #[serde(default = "default_stats_ms")]
    pub stats_ms: u64,
    #[serde(default = "default_list_files_ms")]
    pub list_files_ms: u64,
    #[serde(default = "default_mutation_ms")]
    pub file_mutation_ms: u64,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            history_ms: default_history_ms(),
            list_chats_ms: default_list_chats_ms(),
            parent_lookup_ms: 0,
            mutation_ms: default_mutation_ms(),
            stats_ms: default_stats_ms(),
            list_files_ms: default_list_files_ms(),
            file_mutation_ms: default_mutation_ms(),
        }
    }
}

// ── Serde default functions ─────────────────────────────────────────────

fn default_server_url() -> String {
    "http://localhost:8080/api".to_string()
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_request_timeout_secs() -> u64 {
    25
}
fn default_max_chat_switch_hops() -> u32 {
    3
}
fn default_notice_capacity() -> usize {
    50
}
fn default_history_ms() -> u64 {
    500
}
fn default_list_chats_ms() -> u64 {
    1000
}
fn default_mutation_ms() -> u64 {
    500
}
fn default_stats_ms() -> u64 {
    1000
}
fn default_list_files_ms() -> u64 {
    1000
}

/// Apply compatibility fallbacks after loading raw TOML.
/// Returns true when any field was updated.
pub fn apply_compat_fallbacks(config: &mut SessionConfig) -> bool {
    let mut changed = false;

    if config.sync.poll_interval_ms == 0 {
        config.sync.poll_interval_ms = default_poll_interval_ms();
        changed = true;
    }

    if config.sync.request_timeout_secs == 0 {
        config.sync.request_timeout_secs = default_request_timeout_secs();
        changed = true;
    }

    if config.sync.notice_capacity == 0 {
        config.sync.notice_capacity = default_notice_capacity();
        changed = true;
    }

    let trimmed = config.server.url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        config.server.url = default_server_url();
        changed = true;
    } else if trimmed != config.server.url {
        config.server.url = trimmed.to_string();
        changed = true;
    }

    changed
}

/// Platform config location, e.g. `~/.config/chatsync/chatsync.toml`.
pub fn default_config_path() -> Result<PathBuf> {
    directories::ProjectDirs::from("", "", "chatsync")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::NoConfigDir)
}

/// Load config from `path`. A missing file yields defaults.
pub fn load_config(path: &Path) -> Result<SessionConfig> {
    if !path.exists() {
        tracing::debug!("No config at {}, using defaults", path.display());
        return Ok(SessionConfig::default());
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config: SessionConfig =
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    if apply_compat_fallbacks(&mut config) {
        tracing::info!("Normalized config values loaded from {}", path.display());
    }
    Ok(config)
}
