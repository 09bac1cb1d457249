use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding `remote.base_url`.
pub const ENV_REMOTE_URL: &str = "TETHER_REMOTE_URL";
/// Environment variable overriding `remote.token`.
pub const ENV_TOKEN: &str = "TETHER_TOKEN";
/// Environment variable overriding `store.path`.
pub const ENV_STATE_DB: &str = "TETHER_STATE_DB";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub downloads: DownloadConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Tries per GET request. Writes are sent once.
    #[serde(default = "default_request_attempts")]
    pub request_attempts: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            timeout_secs: default_timeout_secs(),
            request_attempts: default_request_attempts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_offline_expiry_days")]
    pub offline_expiry_days: i64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Apps the static connectivity policy reports as offline.
    #[serde(default)]
    pub offline_apps: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            offline_expiry_days: default_offline_expiry_days(),
            history_limit: default_history_limit(),
            offline_apps: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadConfig {
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            tick_millis: default_tick_millis(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// State database location. `None` means [`default_state_db_path`].
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl EngineConfig {
    /// Apply `TETHER_*` overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_REMOTE_URL).filter(|v| !v.trim().is_empty()) {
            self.remote.base_url = Some(url);
        }
        if let Some(token) = lookup(ENV_TOKEN).filter(|v| !v.trim().is_empty()) {
            self.remote.token = Some(token);
        }
        if let Some(path) = lookup(ENV_STATE_DB).filter(|v| !v.trim().is_empty()) {
            self.store.path = Some(PathBuf::from(path));
        }
    }

    /// Resolved state database path.
    #[must_use]
    pub fn state_db_path(&self) -> PathBuf {
        self.store.path.clone().unwrap_or_else(default_state_db_path)
    }

    #[must_use]
    pub fn offline_expiry(&self) -> chrono::Duration {
        chrono::Duration::days(self.sync.offline_expiry_days)
    }

    #[must_use]
    pub const fn download_tick(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.downloads.tick_millis)
    }
}

/// `<config_dir>/tether/config.toml`, if the platform has a config dir.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tether/config.toml"))
}

/// `<data_dir>/tether/state.sqlite3`, falling back to the working directory.
#[must_use]
pub fn default_state_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether/state.sqlite3")
}

/// Load a config file. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<EngineConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Load the user config and apply environment overrides.
pub fn load_config() -> Result<EngineConfig> {
    let mut config = match config_path() {
        Some(path) => load_config_from(&path)?,
        None => EngineConfig::default(),
    };
    config.apply_env_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_request_attempts() -> u32 {
    2
}

const fn default_offline_expiry_days() -> i64 {
    7
}

const fn default_history_limit() -> usize {
    100
}

const fn default_tick_millis() -> u64 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_config_uses_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cfg = load_config_from(&dir.path().join("config.toml")).expect("load should succeed");
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.remote.timeout_secs, 30);
        assert_eq!(cfg.remote.request_attempts, 2);
        assert_eq!(cfg.sync.offline_expiry_days, 7);
        assert_eq!(cfg.sync.history_limit, 100);
        assert_eq!(cfg.downloads.tick_millis, 1000);
    }

    #[test]
    fn partial_sections_keep_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[remote]
base_url = "https://api.example.com/v1"

[sync]
offline_apps = ["app-a", "app-b"]
"#,
        )
        .expect("write config");

        let cfg = load_config_from(&path).expect("parse");
        assert_eq!(cfg.remote.base_url.as_deref(), Some("https://api.example.com/v1"));
        assert_eq!(cfg.remote.timeout_secs, 30);
        assert_eq!(cfg.sync.offline_apps, vec!["app-a", "app-b"]);
        assert_eq!(cfg.sync.history_limit, 100);
    }

    #[test]
    fn malformed_config_reports_path() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[remote\nbase_url = 1").expect("write config");

        let err = load_config_from(&path).expect_err("parse must fail");
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn env_overrides_win_and_ignore_blank_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_REMOTE_URL, "https://override.example.com"),
            (ENV_TOKEN, "  "),
            (ENV_STATE_DB, "/tmp/tether-test.sqlite3"),
        ]);
        let mut cfg = EngineConfig::default();
        cfg.remote.token = Some("from-file".to_string());
        cfg.apply_env_overrides(|key| env.get(key).map(ToString::to_string));

        assert_eq!(cfg.remote.base_url.as_deref(), Some("https://override.example.com"));
        assert_eq!(cfg.remote.token.as_deref(), Some("from-file"));
        assert_eq!(cfg.state_db_path(), PathBuf::from("/tmp/tether-test.sqlite3"));
    }

    #[test]
    fn token_is_never_serialized() {
        let mut cfg = EngineConfig::default();
        cfg.remote.token = Some("secret".to_string());
        let rendered = toml::to_string(&cfg).expect("serialize");
        assert!(!rendered.contains("secret"));
    }
}
