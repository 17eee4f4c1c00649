use crate::core::rule::{DEFAULT_TABLES, Table};
use crate::utils::{get_config_dir, get_data_dir};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// iptables binary used when nothing else is configured
///
/// Packagers can bake in a path with `IPTKEEPER_SYSTEM_IPTABLES` at build time.
pub const DEFAULT_IPTABLES_BINARY: &str = match option_env!("IPTKEEPER_SYSTEM_IPTABLES") {
    Some(path) => path,
    None => "iptables",
};

/// Bounds for the scheduler tick, in seconds
pub const MIN_TICK_INTERVAL_SECS: u64 = 1;
pub const MAX_TICK_INTERVAL_SECS: u64 = 3600;

/// Application configuration
///
/// Every field falls back to its default individually, so a partial or
/// older config file still loads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// SQLite file holding history and temporary rules
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Seconds between expiry passes (default: 5s, clamped to 1..=3600)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_iptables_binary")]
    pub iptables_binary: String,
    /// Actor recorded in history for CLI changes
    #[serde(default = "default_actor")]
    pub default_actor: String,
    /// Tables read by `list`, `search` and `stats`
    #[serde(default = "default_tables")]
    pub tables: Vec<Table>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            tick_interval_secs: default_tick_interval(),
            iptables_binary: default_iptables_binary(),
            default_actor: default_actor(),
            tables: default_tables(),
        }
    }
}

impl AppConfig {
    /// Tick interval after clamping to the allowed range
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(
            self.tick_interval_secs
                .clamp(MIN_TICK_INTERVAL_SECS, MAX_TICK_INTERVAL_SECS),
        )
    }
}

fn default_database_path() -> PathBuf {
    get_data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("iptkeeper.db")
}

fn default_tick_interval() -> u64 {
    5
}

fn default_iptables_binary() -> String {
    DEFAULT_IPTABLES_BINARY.to_string()
}

fn default_actor() -> String {
    "admin".to_string()
}

fn default_tables() -> Vec<Table> {
    DEFAULT_TABLES.to_vec()
}

/// Location of `config.json`
pub fn config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.json"))
}

/// Saves the config using an atomic write pattern.
/// 1. Writes to a temporary file.
/// 2. Sets restrictive permissions (0o600).
/// 3. Atomically renames to the target path.
pub async fn save_config_to(config: &AppConfig, path: &Path) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp_path = path.with_extension("json.tmp");

    // Create file with restrictive permissions from the start to prevent
    // race condition where file is briefly world-readable
    #[cfg(unix)]
    {
        use tokio::fs::OpenOptions;
        use tokio::io::AsyncWriteExt;

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o600)
            .open(&temp_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
    }

    #[cfg(not(unix))]
    {
        use tokio::io::AsyncWriteExt;

        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
    }

    tokio::fs::rename(&temp_path, path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::StorageFull {
            std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot save configuration. Free up space and try again.",
            )
        } else {
            e
        }
    })
}

/// Saves the config to the default location.
pub async fn save_config(config: &AppConfig) -> std::io::Result<()> {
    match config_path() {
        Some(path) => save_config_to(config, &path).await,
        None => Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Config directory not found",
        )),
    }
}

/// Loads the config at `path`, or returns defaults if it is missing or invalid.
pub async fn load_config_from(path: &Path) -> AppConfig {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
            tracing::warn!("Ignoring invalid config {}: {e}", path.display());
            AppConfig::default()
        }),
        Err(_) => AppConfig::default(),
    }
}

/// Loads the config from the default location.
pub async fn load_config() -> AppConfig {
    match config_path() {
        Some(path) => load_config_from(&path).await,
        None => AppConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "tick_interval_secs": 30, "tables": ["filter"] }"#).unwrap();
        assert_eq!(config.tick_interval_secs, 30);
        assert_eq!(config.tables, vec![Table::Filter]);
        assert_eq!(config.default_actor, "admin");
        assert_eq!(config.iptables_binary, DEFAULT_IPTABLES_BINARY);
    }

    #[test]
    fn test_tick_interval_clamped() {
        let mut config = AppConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_secs(5));

        config.tick_interval_secs = 0;
        assert_eq!(config.tick_interval(), Duration::from_secs(1));

        config.tick_interval_secs = u64::MAX;
        assert_eq!(config.tick_interval(), Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iptkeeper").join("config.json");

        let config = AppConfig {
            default_actor: "ops".to_string(),
            tick_interval_secs: 10,
            ..AppConfig::default()
        };
        save_config_to(&config, &path).await.unwrap();

        assert_eq!(load_config_from(&path).await, config);
        assert!(!path.with_extension("json.tmp").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_invalid_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        assert_eq!(load_config_from(&path).await, AppConfig::default());

        let missing = dir.path().join("missing.json");
        assert_eq!(load_config_from(&missing).await, AppConfig::default());
    }
}
