//! Runtime configuration for hosts embedding the core crate.
//!
//! # Responsibility
//! - Collect database path and logging settings from the environment.
//! - Let explicit overrides (CLI flags) win over environment values.
//!
//! # Invariants
//! - `log_level` is always a normalized level name.
//! - `log_target` directories are absolute.

use crate::logging::{default_log_level, normalize_level, LogTarget};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const ENV_DB_PATH: &str = "VEROBJ_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "VEROBJ_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "VEROBJ_LOG_DIR";

/// Configuration error with the offending setting name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub setting: &'static str,
    pub message: String,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: {}", self.setting, self.message)
    }
}

impl Error for ConfigError {}

/// Resolved core settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// SQLite file; `None` means the host must supply one.
    pub db_path: Option<PathBuf>,
    pub log_level: &'static str,
    pub log_target: LogTarget,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            log_level: default_log_level(),
            log_target: LogTarget::Stderr,
        }
    }
}

impl CoreConfig {
    /// Reads `VEROBJ_DB_PATH`, `VEROBJ_LOG_LEVEL` and `VEROBJ_LOG_DIR`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(
            lookup(ENV_DB_PATH).map(PathBuf::from),
            lookup(ENV_LOG_LEVEL),
            lookup(ENV_LOG_DIR).map(PathBuf::from),
        )?;
        Ok(config)
    }

    /// Replaces settings for every `Some` value. Blank strings are ignored.
    pub fn apply_overrides(
        &mut self,
        db_path: Option<PathBuf>,
        log_level: Option<String>,
        log_dir: Option<PathBuf>,
    ) -> Result<(), ConfigError> {
        if let Some(path) = db_path.filter(|path| !path.as_os_str().is_empty()) {
            self.db_path = Some(path);
        }
        if let Some(level) = log_level.filter(|level| !level.trim().is_empty()) {
            self.log_level = normalize_level(&level).map_err(|message| ConfigError {
                setting: "log level",
                message,
            })?;
        }
        if let Some(dir) = log_dir.filter(|dir| !dir.as_os_str().is_empty()) {
            self.log_target = LogTarget::directory(dir).map_err(|message| ConfigError {
                setting: "log directory",
                message,
            })?;
        }
        Ok(())
    }
}
