//! # Configuration
//!
//! Optional TOML configuration for the CLI. Every value has a default, and
//! command-line flags override the file.
//!
//! ```toml
//! database = "scholink.redb"
//! backend = "redb"          # or "file"
//!
//! [log]
//! format = "json"           # or "text"
//! filter = "scholink=info"
//! ```

use clap::ValueEnum;
use scholink_core::ScholinkError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "scholink.toml";

/// Environment variable that overrides `[log] format`.
pub const LOG_FORMAT_ENV: &str = "SCHOLINK_LOG_FORMAT";

/// Maximum config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Storage backend selected for the database path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// redb database (ACID, persistent).
    #[default]
    Redb,
    /// In-memory graph saved as a canonical export after each write command.
    File,
}

impl Backend {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Redb => "redb",
            Backend::File => "file",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// `EnvFilter` directives, used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "scholink=info,scholink_core=warn".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_filter(),
        }
    }
}

impl LogConfig {
    /// The format after applying the environment override. Unknown values
    /// fall back to the configured format.
    #[must_use]
    pub fn effective_format(&self, env: Option<&str>) -> LogFormat {
        match env.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            Some(v) if v.eq_ignore_ascii_case("text") => LogFormat::Text,
            _ => self.format,
        }
    }
}

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_database() -> PathBuf {
    PathBuf::from("scholink.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: default_database(),
            backend: Backend::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self, ScholinkError> {
        toml::from_str(contents)
            .map_err(|e| ScholinkError::Serialization(format!("Config: {}", e)))
    }

    /// Load a config file.
    pub fn load(path: &Path) -> Result<Self, ScholinkError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            ScholinkError::Io(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ScholinkError::Serialization(format!(
                "Config file size {} bytes exceeds maximum allowed {} bytes",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ScholinkError::Io(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&contents)
    }

    /// An explicit path must exist; otherwise `scholink.toml` in `dir` is
    /// used when present, and the defaults when not.
    pub fn discover(explicit: Option<&Path>, dir: &Path) -> Result<Self, ScholinkError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let fallback = dir.join(DEFAULT_CONFIG_FILE);
        if fallback.is_file() {
            Self::load(&fallback)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply command-line overrides.
    pub fn override_with(&mut self, database: Option<PathBuf>, backend: Option<Backend>) {
        if let Some(database) = database {
            self.database = database;
        }
        if let Some(backend) = backend {
            self.backend = backend;
        }
    }
}
