//! Per-job artifact storage
//!
//! Every job owns a namespace (one directory) of named blobs. Stage state is
//! stored as JSON, the raw upload as a single video blob.
//!
//! # Naming
//!
//! | Artifact | File |
//! |----------|------|
//! | video | `{entry_id}_video.mp4` |
//! | original_area | `{entry_id}_original_area.json` |
//! | simulated_area | `{entry_id}_simulated_area.json` |
//! | defoliation | `{entry_id}_defoliation.json` |
//!
//! These names are shared with the remote store and must not change.

pub mod store;

pub use store::{ArtifactStore, FilesystemStore};

use crate::error::{LeafError, LeafResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kinds of artifact a job can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Raw uploaded video
    Video,
    /// Original leaf area stage state
    OriginalArea,
    /// Simulated leaf area stage state
    SimulatedArea,
    /// Defoliation stage state
    Defoliation,
}

impl ArtifactKind {
    /// All artifact kinds, in upload order
    pub fn all() -> &'static [Self] {
        &[
            Self::Video,
            Self::OriginalArea,
            Self::SimulatedArea,
            Self::Defoliation,
        ]
    }

    /// Name used in file names and remote headers
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::OriginalArea => "original_area",
            Self::SimulatedArea => "simulated_area",
            Self::Defoliation => "defoliation",
        }
    }

    /// File extension, without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Video => "mp4",
            _ => "json",
        }
    }

    /// File name of this artifact inside a job namespace
    pub fn file_name(&self, entry_id: &str) -> String {
        format!("{}_{}.{}", entry_id, self.as_str(), self.extension())
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = LeafError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| LeafError::UnknownArtifact(s.to_string()))
    }
}

/// Validate a job id before it is used as a directory name
pub fn validate_entry_id(entry_id: &str) -> LeafResult<()> {
    let reason = if entry_id.is_empty() {
        Some("empty")
    } else if entry_id == "." || entry_id == ".." {
        Some("reserved name")
    } else if !entry_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        Some("only [A-Za-z0-9._-] allowed")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(LeafError::InvalidEntryId {
            id: entry_id.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
