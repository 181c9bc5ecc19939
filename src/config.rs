//! Application configuration
//!
//! Connection details come from the environment (optionally a `.env` file).
//! Sync timing is user-tunable and lives in the settings table as JSON.

use crate::api::DEFAULT_BASE_URL;
use crate::db::{Database, DbError};
use crate::sync::accounts::DEFAULT_ACCOUNT_WORKERS;
use crate::sync::transactions::DEFAULT_MAX_PAGES;
use crate::sync::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_API_TOKEN: &str = "PENNYWISE_API_TOKEN";
pub const ENV_API_URL: &str = "PENNYWISE_API_URL";
pub const ENV_DB_PATH: &str = "PENNYWISE_DB_PATH";

const DB_FILE_NAME: &str = "pennywise.db";
const SYNC_SETTINGS_KEY: &str = "sync_settings";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Could not determine a data directory; set {0}")]
    NoDataDir(&'static str),

    #[error("Invalid sync settings: {0}")]
    InvalidSettings(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

// ============================================================================
// Environment
// ============================================================================

/// Startup configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_token: String,
    pub api_url: String,
    pub db_path: PathBuf,
}

impl AppConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_token = get(ENV_API_TOKEN).ok_or(ConfigError::Missing(ENV_API_TOKEN))?;
        let api_url = get(ENV_API_URL).unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let db_path = match get(ENV_DB_PATH) {
            Some(path) => PathBuf::from(path),
            None => default_db_path()?,
        };

        Ok(Self {
            api_token,
            api_url,
            db_path,
        })
    }
}

/// `<platform data dir>/pennywise.db`
pub fn default_db_path() -> Result<PathBuf, ConfigError> {
    let dirs = directories::ProjectDirs::from("com", "pennywise", "pennywise")
        .ok_or(ConfigError::NoDataDir(ENV_DB_PATH))?;
    Ok(dirs.data_dir().join(DB_FILE_NAME))
}

// ============================================================================
// Sync settings
// ============================================================================

/// Sync timing stored in the settings table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub stale_ttl_secs: u64,
    pub poll_interval_secs: u64,
    pub backoff_secs: Vec<u64>,
    pub account_workers: usize,
    pub max_transaction_pages: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            stale_ttl_secs: engine.stale_ttl.as_secs(),
            poll_interval_secs: engine.poll_interval.as_secs(),
            backoff_secs: engine.backoff.iter().map(Duration::as_secs).collect(),
            account_workers: DEFAULT_ACCOUNT_WORKERS,
            max_transaction_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl SyncSettings {
    /// Load from the settings table, falling back to defaults
    pub fn load(db: &Database) -> Result<Self, ConfigError> {
        let settings: SyncSettings = db.get_setting(SYNC_SETTINGS_KEY)?.unwrap_or_default();
        settings.validate()?;
        Ok(settings)
    }

    /// Validate and save to the settings table
    pub fn save(&self, db: &Database) -> Result<(), ConfigError> {
        self.validate()?;
        db.set_setting(SYNC_SETTINGS_KEY, self)?;
        log::info!("Sync settings saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs < 10 || self.poll_interval_secs > 86_400 {
            return Err(ConfigError::InvalidSettings(format!(
                "Poll interval must be 10-86400 seconds, got {}",
                self.poll_interval_secs
            )));
        }
        if self.stale_ttl_secs > 86_400 {
            return Err(ConfigError::InvalidSettings(format!(
                "Stale TTL must be at most 86400 seconds, got {}",
                self.stale_ttl_secs
            )));
        }
        if self.backoff_secs.iter().any(|&s| s == 0 || s > 3_600) {
            return Err(ConfigError::InvalidSettings(
                "Backoff delays must be 1-3600 seconds".to_string(),
            ));
        }
        if self.account_workers > 16 {
            return Err(ConfigError::InvalidSettings(format!(
                "At most 16 account workers, got {}",
                self.account_workers
            )));
        }
        Ok(())
    }

    /// Engine timing; zero or empty values fall back to the engine defaults
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            stale_ttl: Duration::from_secs(self.stale_ttl_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            backoff: self.backoff_secs.iter().copied().map(Duration::from_secs).collect(),
        }
        .normalized()
    }
}
