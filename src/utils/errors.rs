// src/utils/errors.rs
//! Engine error taxonomy
//!
//! Only registration-time misuse reaches callers. Runtime faults inside the
//! fixture store and the emulator are recovered locally and logged.

use thiserror::Error;

/// Result alias used across the engine
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing or invalid protocol/hostname, bad pattern, unsafe environment
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Scheme other than http/https
    #[error("Unsupported protocol {0}")]
    UnsupportedProtocol(String),

    #[error("Unimplemented body format: {0}")]
    UnimplementedBodyFormat(String),

    /// Corrupt fixture file; recovered as a cache miss
    #[error("Malformed fixture {path}: {reason}")]
    MalformedFixture { path: String, reason: String },

    /// Live fetch failed; recovered by synthesizing a 500 fixture
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// Fixture persistence failed; response still served from memory
    #[error("Filesystem failure: {0}")]
    FilesystemFailure(String),

    #[error("Interception failed: {0}")]
    InterceptionFailed(String),
}

impl EngineError {
    /// Whether the error is recovered inside the engine rather than surfaced
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::MalformedFixture { .. }
                | EngineError::NetworkFailure(_)
                | EngineError::FilesystemFailure(_)
        )
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(e: config::ConfigError) -> Self {
        EngineError::ConfigurationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = EngineError::UnsupportedProtocol("ftp:".to_string());
        assert_eq!(err.to_string(), "Unsupported protocol ftp:");
    }

    #[test]
    fn test_recoverable() {
        assert!(EngineError::NetworkFailure("boom".into()).is_recoverable());
        assert!(!EngineError::ConfigurationError("no host".into()).is_recoverable());
    }
}
