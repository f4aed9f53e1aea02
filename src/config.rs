//! Grader configuration.
//!
//! The embedding application constructs one `GraderConfig` at startup and
//! threads it through [`crate::stages::StageExecutors`]. Three sources are
//! supported: explicit construction, environment variables (with `.env`
//! support), and a TOML file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings for one grading session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraderConfig {
    /// Root of the durable store (students/, testcases/).
    pub data_root: PathBuf,
    /// Path of the C compiler executable.
    #[serde(default = "default_compiler_path")]
    pub compiler_path: PathBuf,
    /// Wall-clock limit for one compiler invocation.
    #[serde(default = "default_compile_timeout_secs")]
    pub compile_timeout_secs: u64,
    /// Upper bound on concurrently running student pipelines.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Supervisor scheduling interval.
    #[serde(default = "default_supervisor_tick_ms")]
    pub supervisor_tick_ms: u64,
}

impl GraderConfig {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            compiler_path: default_compiler_path(),
            compile_timeout_secs: default_compile_timeout_secs(),
            max_workers: default_max_workers(),
            supervisor_tick_ms: default_supervisor_tick_ms(),
        }
    }

    pub fn with_compiler_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.compiler_path = path.into();
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Load from environment variables, falling back to defaults. Reads a
    /// `.env` file first when one exists.
    ///
    /// Variables: `GRADEPIPE_DATA_ROOT`, `GRADEPIPE_COMPILER`,
    /// `GRADEPIPE_COMPILE_TIMEOUT_SECS`, `GRADEPIPE_MAX_WORKERS`,
    /// `GRADEPIPE_SUPERVISOR_TICK_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let data_root = std::env::var("GRADEPIPE_DATA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./gradepipe-data"));
        let compiler_path = std::env::var("GRADEPIPE_COMPILER")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_compiler_path());

        let config = Self {
            data_root,
            compiler_path,
            compile_timeout_secs: env_number(
                "GRADEPIPE_COMPILE_TIMEOUT_SECS",
                default_compile_timeout_secs(),
            )?,
            max_workers: env_number("GRADEPIPE_MAX_WORKERS", default_max_workers())?,
            supervisor_tick_ms: env_number(
                "GRADEPIPE_SUPERVISOR_TICK_MS",
                default_supervisor_tick_ms(),
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".into()));
        }
        if self.compile_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "compile_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn env_number<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("{name} must be a number, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn default_compiler_path() -> PathBuf {
    PathBuf::from("cc")
}

fn default_compile_timeout_secs() -> u64 {
    30
}

fn default_max_workers() -> usize {
    4
}

fn default_supervisor_tick_ms() -> u64 {
    200
}
