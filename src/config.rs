//! Server configuration loaded from TOML.
//!
//! Every section is optional:
//!
//! ```toml
//! log_level = "info"
//!
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//! allow_origins = ["http://localhost:3000"]
//!
//! [fetch]
//! default_limit = 1000
//! max_limit = 1000
//! request_timeout_ms = 30000
//! read_batch_size = 1000
//!
//! [[import_groups]]
//! name = "frequent_2024_02_01"
//! path = "caches/frequent.json"
//!
//! [local]
//! sqlite_path = "local.db"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fetch::{FetchOptions, DEFAULT_LIMIT};
use crate::partition::DEFAULT_READ_BATCH_SIZE;

/// Configuration failures, with the file they came from.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`MixerConfig`].
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Offending key.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// HTTP listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Origins allowed by CORS; empty allows any.
    pub allow_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            allow_origins: Vec::new(),
        }
    }
}

/// Engine limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Limit used for 0 or oversized requests.
    pub default_limit: usize,
    /// Largest limit honored as given.
    pub max_limit: usize,
    /// Per-request deadline in milliseconds; 0 disables it.
    pub request_timeout_ms: u64,
    /// Page reads per partition batch.
    pub read_batch_size: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: DEFAULT_LIMIT,
            request_timeout_ms: 30_000,
            read_batch_size: DEFAULT_READ_BATCH_SIZE,
        }
    }
}

impl FetchConfig {
    /// Engine options for these settings.
    pub fn options(&self) -> FetchOptions {
        FetchOptions {
            default_limit: self.default_limit,
            max_limit: self.max_limit,
            timeout: (self.request_timeout_ms > 0)
                .then(|| Duration::from_millis(self.request_timeout_ms)),
        }
    }
}

/// One import group cache file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportGroupConfig {
    /// Group name; its prefix decides the rank.
    pub name: String,
    /// Cache file written by `mixer build-cache`.
    pub path: PathBuf,
}

/// Optional SQLite triples store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Database file.
    pub sqlite_path: Option<PathBuf>,
}

/// Root of the configuration file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Default tracing filter.
    pub log_level: String,
    /// Listener.
    pub server: ServerConfig,
    /// Engine limits.
    pub fetch: FetchConfig,
    /// Import groups, in any order.
    pub import_groups: Vec<ImportGroupConfig>,
    /// Local store.
    pub local: LocalConfig,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            server: ServerConfig::default(),
            fetch: FetchConfig::default(),
            import_groups: Vec::new(),
            local: LocalConfig::default(),
        }
    }
}

impl MixerConfig {
    /// Reads and validates `path`. Relative cache and database paths are
    /// resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for group in &mut self.import_groups {
            if group.path.is_relative() {
                group.path = base.join(&group.path);
            }
        }
        if let Some(db) = self.local.sqlite_path.as_mut() {
            if db.is_relative() {
                *db = base.join(&*db);
            }
        }
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fetch = &self.fetch;
        if fetch.default_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "fetch.default_limit",
                reason: "must be positive".into(),
            });
        }
        if fetch.max_limit < fetch.default_limit {
            return Err(ConfigError::Invalid {
                field: "fetch.max_limit",
                reason: format!(
                    "{} is below default_limit {}",
                    fetch.max_limit, fetch.default_limit
                ),
            });
        }
        if fetch.read_batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "fetch.read_batch_size",
                reason: "must be positive".into(),
            });
        }
        let mut names: Vec<&str> = self.import_groups.iter().map(|g| g.name.as_str()).collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(ConfigError::Invalid {
                field: "import_groups.name",
                reason: format!("'{}' is listed twice", pair[0]),
            });
        }
        Ok(())
    }
}
