//! Configuration for adapter selection and logging.
//!
//! # Responsibility
//! - Describe which adapter to build and how to log, as plain serde data.
//! - Parse adapter URLs (`memory`, `sqlite://path`, ...) for CLI/env use.
//!
//! # Invariants
//! - An absent adapter section means the Null Adapter, never a silent default
//!   store.

use crate::logging::default_log_level;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const SQLITE_SCHEME: &str = "sqlite://";
const SQLITE_MEMORY: &str = "sqlite::memory:";

/// Which backend a repository should be wired to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterConfig {
    #[default]
    Null,
    Memory,
    SqliteMemory,
    Sqlite {
        path: PathBuf,
    },
}

impl FromStr for AdapterConfig {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        match trimmed {
            "null" => Ok(Self::Null),
            "memory" => Ok(Self::Memory),
            SQLITE_MEMORY => Ok(Self::SqliteMemory),
            _ => match trimmed.strip_prefix(SQLITE_SCHEME) {
                Some(path) if !path.is_empty() => Ok(Self::Sqlite {
                    path: PathBuf::from(path),
                }),
                _ => Err(ConfigError::InvalidAdapterUrl(trimmed.to_string())),
            },
        }
    }
}

/// Logging level and optional log directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level_string")]
    pub level: String,
    /// Absolute directory for rotating log files; stderr when absent.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level_string(),
            dir: None,
        }
    }
}

fn default_level_string() -> String {
    default_log_level().to_string()
}

/// Top-level config file shape.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StowageConfig {
    #[serde(default)]
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StowageConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(ConfigError::Parse)
    }

    /// Reads and parses a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
            path: path.to_path_buf(),
            source: err,
        })?;
        Self::from_toml_str(&source)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(toml::de::Error),
    InvalidAdapterUrl(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config: {err}"),
            Self::InvalidAdapterUrl(value) => write!(
                f,
                "unsupported adapter `{value}`; expected null|memory|sqlite::memory:|sqlite://<path>"
            ),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::InvalidAdapterUrl(_) => None,
        }
    }
}
