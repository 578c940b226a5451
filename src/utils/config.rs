// src/utils/config.rs
//! Engine configuration
//!
//! Layered with the `config` crate: built-in defaults, an optional
//! `replay.toml` next to the process, then `REPLAY_*` environment variables
//! (`REPLAY_FIXTURES__DIR=/tmp/mocks`, `REPLAY_ENV=test`, ...).

use crate::utils::errors::{EngineError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Longest fixture filename kept verbatim before it is replaced by a digest
pub const DEFAULT_MAX_FILENAME_LEN: usize = 250;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Deployment environment name; selects the default fixture directory
    pub env: String,

    /// Allow the engine to run when `env` is "production"
    #[serde(default)]
    pub unsafe_mode: bool,

    pub fixtures: FixtureConfig,

    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureConfig {
    /// Fixture root; `mocks/<env>` when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,

    pub max_filename_len: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from defaults, `replay.toml` and the environment
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("env", "development")?
            .set_default("unsafe_mode", false)?
            .set_default("fixtures.max_filename_len", DEFAULT_MAX_FILENAME_LEN as u64)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .add_source(config::File::with_name("replay").required(false))
            .add_source(
                config::Environment::with_prefix("REPLAY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration rooted at an explicit fixture directory
    pub fn with_fixture_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            fixtures: FixtureConfig {
                dir: Some(dir.into()),
                max_filename_len: DEFAULT_MAX_FILENAME_LEN,
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.env.trim().is_empty() {
            return Err(EngineError::ConfigurationError(
                "env must not be empty".to_string(),
            ));
        }
        if self.fixtures.max_filename_len == 0 {
            return Err(EngineError::ConfigurationError(
                "fixtures.max_filename_len must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Refuse to run against production unless explicitly unlocked
    pub fn ensure_safe(&self) -> Result<()> {
        if self.env == "production" && !self.unsafe_mode {
            return Err(EngineError::ConfigurationError(
                "Using of mocks in production is not recommended. Set unsafe_mode to override this behaviour"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Absolute fixture root
    pub fn fixture_dir(&self) -> PathBuf {
        let dir = self
            .fixtures
            .dir
            .clone()
            .unwrap_or_else(|| Path::new("mocks").join(&self.env));

        if dir.is_absolute() {
            dir
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&dir))
                .unwrap_or(dir)
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            env: "development".to_string(),
            unsafe_mode: false,
            fixtures: FixtureConfig {
                dir: None,
                max_filename_len: DEFAULT_MAX_FILENAME_LEN,
            },
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fixture_dir() {
        let config = EngineConfig::default();
        let dir = config.fixture_dir();
        assert!(dir.is_absolute());
        assert!(dir.ends_with("mocks/development"));
    }

    #[test]
    fn test_production_guard() {
        let mut config = EngineConfig {
            env: "production".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.ensure_safe(),
            Err(EngineError::ConfigurationError(_))
        ));

        config.unsafe_mode = true;
        assert!(config.ensure_safe().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_filename_len() {
        let mut config = EngineConfig::with_fixture_dir("/tmp/fixtures");
        config.fixtures.max_filename_len = 0;
        assert!(config.validate().is_err());
    }
}
