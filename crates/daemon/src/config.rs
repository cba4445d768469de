use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use chatsync_runtime_config::{SessionConfig, default_config_path, load_config};

/// Environment variable that overrides the default config location.
pub const CONFIG_ENV: &str = "CHATSYNC_CONFIG";

/// Pick the config file: `--config`, then `$CHATSYNC_CONFIG`, then the
/// platform default.
pub fn resolve_config_path(explicit: Option<&Path>, env_value: Option<String>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = env_value.filter(|v| !v.trim().is_empty()) {
        return Ok(PathBuf::from(path));
    }
    default_config_path().context("Could not determine config location")
}

/// Load config from the resolved path, applying a `--server` override.
pub fn load(explicit: Option<&Path>, server_override: Option<&str>) -> Result<SessionConfig> {
    let path = resolve_config_path(explicit, std::env::var(CONFIG_ENV).ok())?;
    let mut config = load_config(&path)
        .with_context(|| format!("Failed to load config at {}", path.display()))?;
    if let Some(url) = server_override {
        config.server.url = url.trim_end_matches('/').to_string();
    }
    Ok(config)
}
