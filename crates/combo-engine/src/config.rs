//! # Engine Configuration
//!
//! Built-in defaults, overlaid by `engine.toml` from the platform config
//! directory (or `--config`), overlaid by `COMBO_*` environment variables.
//! The result is validated before any loop starts.
//!
//! ## File Format
//! ```toml
//! # engine.toml
//! [instance]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Storefront"
//!
//! [database]
//! path = "combo.db"
//! max_connections = 5
//!
//! [worker]
//! poll_interval_secs = 5
//! batch_size = 50
//! max_attempts = 5
//!
//! [monitor]
//! enabled = true
//! interval_secs = 300
//!
//! [ledger]
//! reconcile_interval_secs = 3600
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use combo_db::DbConfig;

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Instance
// =============================================================================

/// Identifies this engine instance in logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSettings {
    /// Auto-generated on first run if not provided.
    pub id: String,

    #[serde(default = "default_instance_name")]
    pub name: String,
}

fn default_instance_name() -> String {
    "combo-engine".to_string()
}

impl Default for InstanceSettings {
    fn default() -> Self {
        InstanceSettings {
            id: Uuid::new_v4().to_string(),
            name: default_instance_name(),
        }
    }
}

// =============================================================================
// Database
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file path.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Pool acquire timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// How long a writer waits on the SQLite lock (milliseconds).
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("combo.db")
}
fn default_max_connections() -> u32 {
    5
}
fn default_connect_timeout() -> u64 {
    30
}
fn default_busy_timeout() -> u64 {
    5000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

// =============================================================================
// Recompute Worker
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Interval between queue polls (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Requests taken per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Failed attempts after which a request is no longer retried.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Completed requests older than this are deleted.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_poll_interval() -> u64 {
    5
}
fn default_batch_size() -> u32 {
    50
}
fn default_max_attempts() -> u32 {
    5
}
fn default_retention_days() -> u32 {
    7
}

impl Default for WorkerSettings {
    fn default() -> Self {
        WorkerSettings {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            retention_days: default_retention_days(),
        }
    }
}

// =============================================================================
// Safety Monitor
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interval between health passes (seconds).
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_monitor_interval() -> u64 {
    300
}

impl Default for MonitorSettings {
    fn default() -> Self {
        MonitorSettings {
            enabled: true,
            interval_secs: default_monitor_interval(),
        }
    }
}

// =============================================================================
// Ledger
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// Interval between full reservation reconciliations (seconds).
    /// 0 disables the periodic pass.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
}

fn default_reconcile_interval() -> u64 {
    3600
}

impl Default for LedgerSettings {
    fn default() -> Self {
        LedgerSettings {
            reconcile_interval_secs: default_reconcile_interval(),
        }
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub instance: InstanceSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub worker: WorkerSettings,

    #[serde(default)]
    pub monitor: MonitorSettings,

    #[serde(default)]
    pub ledger: LedgerSettings,
}

impl EngineConfig {
    /// Defaults, then the TOML file if it exists, then environment
    /// overrides. A missing file is not an error; a malformed one is.
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Reading engine config");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "No engine config file, keeping defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Rejects settings the loops cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.instance.id.is_empty() {
            return Err(EngineError::InvalidConfig("instance.id must not be empty".into()));
        }
        if self.database.path.as_os_str().is_empty() {
            return Err(EngineError::InvalidConfig("database.path must not be empty".into()));
        }
        if self.database.max_connections == 0 {
            return Err(EngineError::InvalidConfig(
                "database.max_connections must be greater than 0".into(),
            ));
        }
        if self.worker.batch_size == 0 {
            return Err(EngineError::InvalidConfig("worker.batch_size must be greater than 0".into()));
        }
        if self.worker.poll_interval_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "worker.poll_interval_secs must be greater than 0".into(),
            ));
        }
        if self.worker.max_attempts == 0 {
            return Err(EngineError::InvalidConfig("worker.max_attempts must be greater than 0".into()));
        }
        if self.monitor.enabled && self.monitor.interval_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "monitor.interval_secs must be greater than 0 when the monitor is enabled".into(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("COMBO_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(secs) = env_number("COMBO_POLL_INTERVAL_SECS") {
            self.worker.poll_interval_secs = secs;
        }

        if let Some(size) = env_number("COMBO_BATCH_SIZE") {
            self.worker.batch_size = size;
        }

        if let Some(attempts) = env_number("COMBO_MAX_ATTEMPTS") {
            self.worker.max_attempts = attempts;
        }

        if let Some(secs) = env_number("COMBO_MONITOR_INTERVAL_SECS") {
            self.monitor.interval_secs = secs;
        }

        if let Some(secs) = env_number("COMBO_RECONCILE_INTERVAL_SECS") {
            self.ledger.reconcile_interval_secs = secs;
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "combo", "engine")
            .map(|dirs| dirs.config_dir().join("engine.toml"))
    }

    /// Pool configuration for [`combo_db::Database::new`].
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path)
            .max_connections(self.database.max_connections)
            .connect_timeout(Duration::from_secs(self.database.connect_timeout_secs))
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.worker.poll_interval_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.interval_secs)
    }

    /// `None` when periodic reconciliation is disabled.
    pub fn reconcile_interval(&self) -> Option<Duration> {
        match self.ledger.reconcile_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Parses a numeric environment variable, warning on garbage.
fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => {
            debug!(key, value = %raw, "Overriding from environment");
            Some(value)
        }
        Err(_) => {
            warn!(key, value = %raw, "Ignoring non-numeric environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(!config.instance.id.is_empty());
        assert_eq!(config.worker.batch_size, 50);
        assert_eq!(config.monitor.interval_secs, 300);
        assert_eq!(config.reconcile_interval(), Some(Duration::from_secs(3600)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.worker.batch_size = 0;
        assert!(config.validate().unwrap_err().is_config_error());

        config.worker.batch_size = 10;
        config.monitor.interval_secs = 0;
        assert!(config.validate().is_err());

        config.monitor.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [database]
            path = "/tmp/bundles.db"

            [ledger]
            reconcile_interval_secs = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.database.path, PathBuf::from("/tmp/bundles.db"));
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.worker.poll_interval_secs, 5);
        assert_eq!(config.reconcile_interval(), None);
    }

    #[test]
    fn test_toml_serialization() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[database]"));
        assert!(toml_str.contains("[worker]"));
        assert!(toml_str.contains("[monitor]"));
        assert!(toml_str.contains("[ledger]"));
    }
}
