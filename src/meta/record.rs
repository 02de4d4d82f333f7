//! Per-job metadata record

use crate::artifact::ArtifactKind;
use crate::error::LeafError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Flags tracked in a job record
///
/// These are also the nodes of the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobField {
    InVideo,
    InLength,
    InLeafNumber,
    InLeafWidths,
    OutOriginal,
    OutSimulated,
    OutDefoliation,
    UpVideo,
    UpOriginal,
    UpSimulated,
    UpDefoliation,
}

impl JobField {
    pub fn all() -> &'static [Self] {
        &[
            Self::InVideo,
            Self::InLength,
            Self::InLeafNumber,
            Self::InLeafWidths,
            Self::OutOriginal,
            Self::OutSimulated,
            Self::OutDefoliation,
            Self::UpVideo,
            Self::UpOriginal,
            Self::UpSimulated,
            Self::UpDefoliation,
        ]
    }

    pub fn inputs() -> &'static [Self] {
        &[
            Self::InVideo,
            Self::InLength,
            Self::InLeafNumber,
            Self::InLeafWidths,
        ]
    }

    pub fn outputs() -> &'static [Self] {
        &[Self::OutOriginal, Self::OutSimulated, Self::OutDefoliation]
    }

    pub fn uploads() -> &'static [Self] {
        &[
            Self::UpVideo,
            Self::UpOriginal,
            Self::UpSimulated,
            Self::UpDefoliation,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InVideo => "in_video",
            Self::InLength => "in_length",
            Self::InLeafNumber => "in_leaf_number",
            Self::InLeafWidths => "in_leaf_widths",
            Self::OutOriginal => "out_original",
            Self::OutSimulated => "out_simulated",
            Self::OutDefoliation => "out_defoliation",
            Self::UpVideo => "up_video",
            Self::UpOriginal => "up_original",
            Self::UpSimulated => "up_simulated",
            Self::UpDefoliation => "up_defoliation",
        }
    }

    /// Whether this flag marks a raw client input
    pub fn is_input(&self) -> bool {
        Self::inputs().contains(self)
    }

    /// Upload flag for an artifact kind
    pub fn upload_flag(kind: ArtifactKind) -> Self {
        match kind {
            ArtifactKind::Video => Self::UpVideo,
            ArtifactKind::OriginalArea => Self::UpOriginal,
            ArtifactKind::SimulatedArea => Self::UpSimulated,
            ArtifactKind::Defoliation => Self::UpDefoliation,
        }
    }
}

impl fmt::Display for JobField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobField {
    type Err = LeafError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| LeafError::UnknownField(s.to_string()))
    }
}

/// Metadata for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub entry_id: String,

    pub in_video: bool,
    pub in_length: bool,
    pub in_leaf_number: bool,
    pub in_leaf_widths: bool,

    pub out_original: bool,
    pub out_simulated: bool,
    pub out_defoliation: bool,

    pub up_video: bool,
    pub up_original: bool,
    pub up_simulated: bool,
    pub up_defoliation: bool,

    /// Bytes resident in this job's artifact namespace
    pub bytes: u64,

    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,

    /// Final result; stored as `-1` when absent
    #[serde(with = "result_sentinel")]
    pub defoliation_result: Option<f64>,

    /// A client has retrieved the final result
    pub results_fetched: bool,

    /// When a fetched job may be purged
    pub expires_at: Option<DateTime<Utc>>,

    /// Recency rank; larger is more recent
    pub touched: u64,

    /// Stage tasks currently running for this job
    #[serde(skip)]
    pub inflight: u32,
}

impl JobRecord {
    /// Zero-valued record
    pub fn new(entry_id: &str) -> Self {
        let now = Utc::now();
        Self {
            entry_id: entry_id.to_string(),
            in_video: false,
            in_length: false,
            in_leaf_number: false,
            in_leaf_widths: false,
            out_original: false,
            out_simulated: false,
            out_defoliation: false,
            up_video: false,
            up_original: false,
            up_simulated: false,
            up_defoliation: false,
            bytes: 0,
            created_at: now,
            last_updated: now,
            defoliation_result: None,
            results_fetched: false,
            expires_at: None,
            touched: 0,
            inflight: 0,
        }
    }

    pub fn flag(&self, field: JobField) -> bool {
        match field {
            JobField::InVideo => self.in_video,
            JobField::InLength => self.in_length,
            JobField::InLeafNumber => self.in_leaf_number,
            JobField::InLeafWidths => self.in_leaf_widths,
            JobField::OutOriginal => self.out_original,
            JobField::OutSimulated => self.out_simulated,
            JobField::OutDefoliation => self.out_defoliation,
            JobField::UpVideo => self.up_video,
            JobField::UpOriginal => self.up_original,
            JobField::UpSimulated => self.up_simulated,
            JobField::UpDefoliation => self.up_defoliation,
        }
    }

    pub fn set_flag(&mut self, field: JobField, value: bool) {
        let slot = match field {
            JobField::InVideo => &mut self.in_video,
            JobField::InLength => &mut self.in_length,
            JobField::InLeafNumber => &mut self.in_leaf_number,
            JobField::InLeafWidths => &mut self.in_leaf_widths,
            JobField::OutOriginal => &mut self.out_original,
            JobField::OutSimulated => &mut self.out_simulated,
            JobField::OutDefoliation => &mut self.out_defoliation,
            JobField::UpVideo => &mut self.up_video,
            JobField::UpOriginal => &mut self.up_original,
            JobField::UpSimulated => &mut self.up_simulated,
            JobField::UpDefoliation => &mut self.up_defoliation,
        };
        *slot = value;

        // The stored result belongs to the defoliation output
        if field == JobField::OutDefoliation && !value {
            self.defoliation_result = None;
        }
    }

    pub fn uploads_complete(&self) -> bool {
        JobField::uploads().iter().all(|f| self.flag(*f))
    }

    pub fn outputs_complete(&self) -> bool {
        JobField::outputs().iter().all(|f| self.flag(*f))
    }

    /// Safe to evict: no running inference and every upload durable
    pub fn is_evictable(&self) -> bool {
        self.inflight == 0 && self.uploads_complete()
    }

    /// Fetched, expired, and durable
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.results_fetched
            && self.expires_at.is_some_and(|at| at <= now)
            && self.is_evictable()
    }
}

mod result_sentinel {
    use serde::{Deserialize, Deserializer, Serializer};

    const ABSENT: f64 = -1.0;

    pub fn serialize<S: Serializer>(value: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(value.unwrap_or(ABSENT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        let value = f64::deserialize(d)?;
        Ok((value != ABSENT).then_some(value))
    }
}
