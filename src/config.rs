//! Engine configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub recovery: RecoveryConfig,
    pub sink: SinkConfig,
    pub source: SourceConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with fallback chain: explicit path, then
    /// `./.loadkeeper.yml`, then `$XDG_CONFIG_HOME/loadkeeper/loadkeeper.yml`,
    /// then built-in defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".loadkeeper.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("loadkeeper").join("loadkeeper.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Connection to the engine's own control-plane database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL DSN for the `loader` / `execution_lock` / `signal_record`
    /// tables.
    #[serde(rename = "control-plane-url")]
    pub control_plane_url: String,

    /// Environment variable holding the AES-256 key used to
    /// encrypt/decrypt `loaderSql` and source passwords at rest.
    #[serde(rename = "encryption-key-env")]
    pub encryption_key_env: String,

    #[serde(rename = "max-connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            control_plane_url: "postgres://localhost/loadkeeper".to_string(),
            encryption_key_env: "LOADKEEPER_ENCRYPTION_KEY".to_string(),
            max_connections: 10,
        }
    }
}

/// Scheduler tunables (`spec.md` §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    #[serde(rename = "tick-interval-ms")]
    pub tick_interval_ms: u64,

    #[serde(rename = "worker-pool-size")]
    pub worker_pool_size: usize,

    #[serde(rename = "default-lookback-seconds")]
    pub default_lookback_seconds: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            worker_pool_size: 16,
            default_lookback_seconds: 86_400,
        }
    }
}

/// Recovery Sweeper tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    #[serde(rename = "tick-interval-ms")]
    pub tick_interval_ms: u64,

    #[serde(rename = "stale-lock-seconds")]
    pub stale_lock_seconds: i64,

    #[serde(rename = "failed-grace-seconds")]
    pub failed_grace_seconds: i64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 60_000,
            stale_lock_seconds: 120,
            failed_grace_seconds: 1200,
        }
    }
}

/// Ingestion Sink tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    #[serde(rename = "transaction-timeout-seconds")]
    pub transaction_timeout_seconds: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            transaction_timeout_seconds: 60,
        }
    }
}

/// Source Registry tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    #[serde(rename = "pool-max")]
    pub pool_max: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self { pool_max: 4 }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing-subscriber` `EnvFilter` directive.
    pub filter: String,

    /// Directory the `EventLogger` writes per-loader JSONL activity
    /// logs to. `None` disables the subscriber entirely.
    #[serde(rename = "event-log-dir")]
    pub event_log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: "info".to_string(), event_log_dir: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = Config::default();
        assert_eq!(config.scheduler.tick_interval_ms, 1000);
        assert_eq!(config.scheduler.worker_pool_size, 16);
        assert_eq!(config.scheduler.default_lookback_seconds, 86_400);
        assert_eq!(config.recovery.stale_lock_seconds, 120);
        assert_eq!(config.recovery.failed_grace_seconds, 1200);
        assert_eq!(config.sink.transaction_timeout_seconds, 60);
        assert_eq!(config.source.pool_max, 4);
    }

    #[test]
    fn deserializes_partial_config_with_defaults() {
        let yaml = r#"
scheduler:
  worker-pool-size: 32
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.scheduler.worker_pool_size, 32);
        // unspecified fields keep their defaults
        assert_eq!(config.scheduler.tick_interval_ms, 1000);
        assert_eq!(config.recovery.failed_grace_seconds, 1200);
    }

    #[test]
    fn deserializes_full_config() {
        let yaml = r#"
database:
  control-plane-url: "postgres://ctl/loadkeeper"
  encryption-key-env: "MY_KEY"
  max-connections: 20
scheduler:
  tick-interval-ms: 500
  worker-pool-size: 8
  default-lookback-seconds: 3600
recovery:
  tick-interval-ms: 30000
  stale-lock-seconds: 60
  failed-grace-seconds: 600
sink:
  transaction-timeout-seconds: 30
source:
  pool-max: 8
logging:
  filter: "debug"
  event-log-dir: "/var/lib/loadkeeper/events"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.database.control_plane_url, "postgres://ctl/loadkeeper");
        assert_eq!(config.scheduler.tick_interval_ms, 500);
        assert_eq!(config.recovery.stale_lock_seconds, 60);
        assert_eq!(config.sink.transaction_timeout_seconds, 30);
        assert_eq!(config.source.pool_max, 8);
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.logging.event_log_dir, Some(PathBuf::from("/var/lib/loadkeeper/events")));
    }

    #[test]
    fn event_log_dir_defaults_to_disabled() {
        assert_eq!(Config::default().logging.event_log_dir, None);
    }
}
