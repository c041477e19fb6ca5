//! Core configuration loaded from `release.toml`.
//!
//! # Invariants
//! - A missing file yields defaults; a malformed file is an error.
//! - Loaded values are validated before use.

use crate::retry::{RetryPolicy, DEFAULT_DELAY, DEFAULT_MAX_ATTEMPTS};
use log::debug;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "release.toml";
const DEFAULT_LOCK_DURATION_MS: u64 = 5_000;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Release creation lock tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lease duration of the release creation lock.
    #[serde(default = "default_lock_duration_ms")]
    pub duration_ms: u64,
    /// Acquire attempts before giving up with a lock timeout.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Fixed pause between acquire attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            duration_ms: default_lock_duration_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl LockConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_delay_ms),
        )
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_lock_duration_ms() -> u64 {
    DEFAULT_LOCK_DURATION_MS
}

fn default_retry_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    u64::try_from(DEFAULT_DELAY.as_millis()).unwrap_or(u64::MAX)
}

fn default_log_level() -> String {
    crate::logging::default_log_level().to_string()
}

/// Configuration loading or validation failure.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read {CONFIG_FILE_NAME}: {err}"),
            Self::Parse(err) => write!(f, "failed to parse {CONFIG_FILE_NAME}: {err}"),
            Self::Invalid(message) => write!(f, "invalid configuration: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl CoreConfig {
    /// Loads `release.toml` from `dir`, falling back to defaults.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let config_path = dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            debug!("Config file not found at {config_path:?}, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&config_path).map_err(ConfigError::Io)?;
        let config = Self::from_toml_str(&contents)?;
        debug!("Loaded config from {config_path:?}");
        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock.duration_ms == 0 {
            return Err(ConfigError::Invalid(
                "lock.duration_ms must be greater than zero".to_string(),
            ));
        }
        if self.lock.retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "lock.retry_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoreConfig, CONFIG_FILE_NAME};
    use std::time::Duration;

    #[test]
    fn defaults_match_documented_lock_policy() {
        let config = CoreConfig::default();
        assert_eq!(config.lock.duration(), Duration::from_secs(5));
        let policy = config.lock.retry_policy();
        assert_eq!(policy.max_attempts(), 10);
        assert_eq!(policy.delay(), Duration::from_millis(100));
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = CoreConfig::from_toml_str("[lock]\nretry_attempts = 3\n").unwrap();
        assert_eq!(config.lock.retry_attempts, 3);
        assert_eq!(config.lock.duration_ms, 5_000);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = CoreConfig::from_toml_str("[lock]\nretry_attempts = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(CoreConfig::load(dir.path()).unwrap(), CoreConfig::default());
    }

    #[test]
    fn load_reads_file_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[lock]\nduration_ms = 250\n\n[logging]\nlevel = \"warn\"\n",
        )
        .unwrap();

        let config = CoreConfig::load(dir.path()).unwrap();
        assert_eq!(config.lock.duration(), Duration::from_millis(250));
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let err = CoreConfig::from_toml_str("[lock\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
