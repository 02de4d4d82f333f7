//! Error types for leafcache
//!
//! All modules use `LeafResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for leafcache operations
pub type LeafResult<T> = Result<T, LeafError>;

/// All errors that can occur in leafcache
#[derive(Error, Debug)]
pub enum LeafError {
    // Schema errors
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Unknown job field: {0}")]
    UnknownField(String),

    #[error("Unknown artifact kind: {0}")]
    UnknownArtifact(String),

    #[error("Invalid entry id {id:?}: {reason}")]
    InvalidEntryId { id: String, reason: String },

    // Stage computation errors
    #[error("{stage} failed for {entry_id}: {reason}")]
    Computation {
        stage: String,
        entry_id: String,
        reason: String,
    },

    // Transport errors
    #[error("Remote store request failed: {0}")]
    Transport(String),

    #[error("Checksum mismatch for {artifact}: local {local}, remote {remote}")]
    ChecksumMismatch {
        artifact: String,
        local: String,
        remote: String,
    },

    // Capacity errors
    #[error("Cache full: {total} bytes resident, budget {budget}, no evictable job")]
    CapacityExhausted { total: u64, budget: u64 },

    // Storage errors
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
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
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LeafError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a stage computation error
    pub fn computation(
        stage: impl Into<String>,
        entry_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Computation {
            stage: stage.into(),
            entry_id: entry_id.into(),
            reason: reason.into(),
        }
    }

    /// Check if error is retryable
    ///
    /// Only transport-class failures are retried, and only by the upload
    /// pipeline.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ChecksumMismatch { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::CapacityExhausted { .. } => {
                Some("Raise cache.max_bytes or wait for pending uploads to finish")
            }
            Self::Transport(_) => Some("Check upload.remote_url in the configuration"),
            Self::ConfigInvalid { .. } => Some("Run: leafcache config init --force"),
            _ => None,
        }
    }
}
