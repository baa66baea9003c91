//! Error types for netenrich
//!
//! All modules use `EnrichResult<T>` as their return type. Per-record lookup
//! failures are not errors at this level: they are demoted to soft failures
//! on the record (see `pipeline::worker`).

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for netenrich operations
pub type EnrichResult<T> = Result<T, EnrichError>;

/// All errors that can occur in netenrich
#[derive(Error, Debug)]
pub enum EnrichError {
    // Input errors
    #[error("Malformed network range '{input}': {reason}")]
    MalformedRange { input: String, reason: String },

    #[error("Invalid input file {path}: {reason}")]
    InputInvalid { path: PathBuf, reason: String },

    // Lookup errors
    #[error("Transient lookup error: {0}")]
    TransientLookup(String),

    #[error("Permanent lookup error: {0}")]
    PermanentLookup(String),

    #[error("Operation cancelled")]
    Cancelled,

    // State errors
    #[error("Cache store unavailable at {path}: {reason}")]
    CacheUnavailable { path: PathBuf, reason: String },

    #[error("Failed to persist cache store to {path}: {reason}")]
    CachePersist { path: PathBuf, reason: String },

    #[error("Progress state unavailable at {path}: {reason}")]
    ProgressUnavailable { path: PathBuf, reason: String },

    #[error("Failed to persist progress to {path}: {reason}")]
    ProgressPersist { path: PathBuf, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("{0}")]
    User(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EnrichError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a malformed range error
    pub fn malformed(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRange {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientLookup(_))
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::CachePersist { .. } | Self::ProgressPersist { .. } => {
                Some("Check that the state directory is writable, or set cache.path / progress.path")
            }
            Self::ConfigInvalid { .. } => Some("Run: netenrich config show"),
            Self::InputInvalid { .. } => {
                Some("Input must be a JSON array of records or one range per line")
            }
            _ => None,
        }
    }
}
