//! Structured error types for the property service.
//!
//! Only [`ConfigError`] ever reaches callers. [`SourceError`] and
//! [`DecryptError`] are raised inside a single source or item, logged at that
//! boundary and turned into "no data" for the current cycle.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Recovered at the source boundary
    SourceUnavailable,
    MalformedSourceData,
    DecryptionFailed,

    // Surfaced to callers
    AllSourcesFailedAtStartup,
    InvalidChainConfiguration,
    TypeMismatch,
    ManagerDisposed,
    InvalidSettings,
}

/// Errors returned by the public property API.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "cannot read properties from sources after {attempts} attempt(s); unreachable: {}",
        .unreachable.join(", ")
    )]
    AllSourcesFailedAtStartup {
        attempts: u32,
        unreachable: Vec<String>,
    },

    #[error("chained property '{name}' has no usable fallback names")]
    InvalidChain { name: String },

    #[error("property '{name}' is registered as {registered}, requested as {requested}")]
    TypeMismatch {
        name: String,
        registered: &'static str,
        requested: &'static str,
    },

    #[error("property manager has been disposed")]
    Disposed,

    #[error("invalid settings file {}: {reason}", .path.display())]
    InvalidSettings { path: PathBuf, reason: String },
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ConfigError::AllSourcesFailedAtStartup { .. } => ErrorCode::AllSourcesFailedAtStartup,
            ConfigError::InvalidChain { .. } => ErrorCode::InvalidChainConfiguration,
            ConfigError::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            ConfigError::Disposed => ErrorCode::ManagerDisposed,
            ConfigError::InvalidSettings { .. } => ErrorCode::InvalidSettings,
        }
    }

    pub fn invalid_chain(name: impl Into<String>) -> Self {
        ConfigError::InvalidChain { name: name.into() }
    }

    pub fn invalid_settings(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ConfigError::InvalidSettings {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failure inside one configuration source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed data: {0}")]
    Malformed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl SourceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SourceError::Malformed(_) => ErrorCode::MalformedSourceData,
            _ => ErrorCode::SourceUnavailable,
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        SourceError::Malformed(reason.into())
    }
}

/// Failure reported by a [`crate::crypto::Decryptor`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("decryption failed: {0}")]
pub struct DecryptError(pub String);

impl DecryptError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    pub fn code(&self) -> ErrorCode {
        ErrorCode::DecryptionFailed
    }
}

/// Result type for caller-facing operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::AllSourcesFailedAtStartup).unwrap();
        assert_eq!(json, "\"ALL_SOURCES_FAILED_AT_STARTUP\"");
    }

    #[test]
    fn test_startup_error_lists_unreachable_sources() {
        let err = ConfigError::AllSourcesFailedAtStartup {
            attempts: 2,
            unreachable: vec!["http://a".into(), "http://b".into()],
        };
        assert_eq!(err.code(), ErrorCode::AllSourcesFailedAtStartup);
        let message = err.to_string();
        assert!(message.contains("2 attempt(s)"));
        assert!(message.contains("http://a, http://b"));
    }

    #[test]
    fn test_source_error_codes() {
        assert_eq!(
            SourceError::malformed("bad line").code(),
            ErrorCode::MalformedSourceData
        );
        assert_eq!(
            SourceError::Remote("down".into()).code(),
            ErrorCode::SourceUnavailable
        );
        assert_eq!(
            SourceError::Timeout(Duration::from_millis(10)).code(),
            ErrorCode::SourceUnavailable
        );
    }
}
