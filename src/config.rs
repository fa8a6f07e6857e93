//! Configuration for the Graphite client.
//!
//! [`ClientConfig`] is the resolved, immutable configuration a [`Client`]
//! is built with. [`FileConfig`] is the TOML file layout used by the
//! `graphite-send` binary and by hosts that want file-driven setup.
//!
//! [`Client`]: crate::Client

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default timeout when connecting to the Graphite server
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for the write performed by each send
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Separator between path segments
pub const PATH_SEPARATOR: char = '.';

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Bound on establishing the TCP connection
    pub dial_timeout: Duration,
    /// Bound on writing one send's buffer
    pub write_timeout: Duration,
    /// Prepended to every metric path. A separator is appended if missing.
    pub prefix: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            prefix: String::new(),
        }
    }
}

impl ClientConfig {
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

/// Normalize a path prefix so that it ends with exactly one trailing separator.
///
/// An empty prefix stays empty.
pub fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with(PATH_SEPARATOR) {
        prefix.to_string()
    } else {
        format!("{}{}", prefix, PATH_SEPARATOR)
    }
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientSection {
    /// Server address, `host` or `host:port`
    #[serde(default = "default_address")]
    pub address: String,
    /// Dial timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub dial_timeout: f64,
    /// Write timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub write_timeout: f64,
    #[serde(default)]
    pub prefix: String,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            address: default_address(),
            dial_timeout: default_timeout_secs(),
            write_timeout: default_timeout_secs(),
            prefix: String::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_address() -> String {
    "localhost:2003".to_string()
}

fn default_timeout_secs() -> f64 {
    DEFAULT_DIAL_TIMEOUT.as_secs_f64()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl FileConfig {
    /// Load a configuration file from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolve the client section into a [`ClientConfig`].
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        Ok(ClientConfig {
            dial_timeout: seconds("dial_timeout", self.client.dial_timeout)?,
            write_timeout: seconds("write_timeout", self.client.write_timeout)?,
            prefix: self.client.prefix.clone(),
        })
    }
}

/// Convert a seconds value into a duration, rejecting negative and non-finite input.
pub fn seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidDuration { field, value })
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid duration for {field}: {value}")]
    InvalidDuration { field: &'static str, value: f64 },
}
