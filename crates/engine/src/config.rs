//! Engine configuration, read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

pub const ENV_API_URL: &str = "TOKOSYNC_API_URL";
pub const ENV_AUTH_TOKEN: &str = "TOKOSYNC_AUTH_TOKEN";
pub const ENV_DB_PATH: &str = "TOKOSYNC_DB_PATH";
pub const ENV_SYNC_INTERVAL_SECS: &str = "TOKOSYNC_SYNC_INTERVAL_SECS";

/// Where the local SQLite database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    File(PathBuf),
    /// Process-private database, gone when the store is dropped. Used by tests.
    InMemory,
}

impl DatabaseLocation {
    /// `{app_data_dir}/tokosync/local.db`
    pub fn default_file() -> Result<Self, ConfigError> {
        default_db_path()
            .map(DatabaseLocation::File)
            .map_err(|e| ConfigError::DataDir(format!("{e:#}")))
    }

    /// Parse a `TOKOSYNC_DB_PATH` value; `:memory:` selects an in-memory database.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            ":memory:" => DatabaseLocation::InMemory,
            path => DatabaseLocation::File(PathBuf::from(path)),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("failed to resolve local data directory: {0}")]
    DataDir(String),
}

/// Sync engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the backend; resources live under `{api_url}/api/<entity>`.
    pub api_url: String,
    /// Optional bearer token attached to every request.
    pub auth_token: Option<String>,
    pub database: DatabaseLocation,
    /// Tick interval of the background worker.
    pub sync_interval: Duration,
}

impl SyncConfig {
    pub fn new(api_url: impl Into<String>, database: DatabaseLocation) -> Self {
        Self {
            api_url: api_url.into(),
            auth_token: None,
            database,
            sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup(ENV_API_URL)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let auth_token = lookup(ENV_AUTH_TOKEN).filter(|v| !v.trim().is_empty());

        let database = match lookup(ENV_DB_PATH).filter(|v| !v.trim().is_empty()) {
            Some(path) => DatabaseLocation::parse(&path),
            None => DatabaseLocation::default_file()?,
        };

        let sync_interval = match lookup(ENV_SYNC_INTERVAL_SECS) {
            Some(raw) => {
                let secs = raw
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or(ConfigError::Invalid {
                        key: ENV_SYNC_INTERVAL_SECS,
                        value: raw.clone(),
                    })?;
                Duration::from_secs(secs)
            }
            None => DEFAULT_SYNC_INTERVAL,
        };

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            auth_token,
            database,
            sync_interval,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_database(mut self, database: DatabaseLocation) -> Self {
        self.database = database;
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }
}

/// Resolve the path to the SQLite database:
/// `{app_data_dir}/tokosync/local.db`.
fn default_db_path() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share")?;

    let mut path = base;
    path.push("tokosync");
    path.push("local.db");

    Ok(path)
}
