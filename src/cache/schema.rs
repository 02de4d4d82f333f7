//! Fixed stage schema
//!
//! | stage | params | results |
//! |-------|--------|---------|
//! | original_area | leaf_number, leaf_widths | original_area |
//! | simulated_area | video, length | simulated_area |
//! | defoliation | original_area, simulated_area | defoliation |

use crate::artifact::ArtifactKind;
use crate::error::{LeafError, LeafResult};
use crate::meta::JobField;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declared keys of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSchema {
    pub params: &'static [&'static str],
    pub results: &'static [&'static str],
}

const ORIGINAL_AREA: StageSchema = StageSchema {
    params: &["leaf_number", "leaf_widths"],
    results: &["original_area"],
};

const SIMULATED_AREA: StageSchema = StageSchema {
    params: &["video", "length"],
    results: &["simulated_area"],
};

const DEFOLIATION: StageSchema = StageSchema {
    params: &["original_area", "simulated_area"],
    results: &["defoliation"],
};

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    OriginalArea,
    SimulatedArea,
    Defoliation,
}

impl Stage {
    pub fn all() -> &'static [Self] {
        &[Self::OriginalArea, Self::SimulatedArea, Self::Defoliation]
    }

    pub fn as_str(&self) -> &'static str {
        self.artifact_kind().as_str()
    }

    pub fn schema(&self) -> &'static StageSchema {
        match self {
            Self::OriginalArea => &ORIGINAL_AREA,
            Self::SimulatedArea => &SIMULATED_AREA,
            Self::Defoliation => &DEFOLIATION,
        }
    }

    /// Flag set once this stage has produced its result
    pub fn output_field(&self) -> JobField {
        match self {
            Self::OriginalArea => JobField::OutOriginal,
            Self::SimulatedArea => JobField::OutSimulated,
            Self::Defoliation => JobField::OutDefoliation,
        }
    }

    /// Flag set once this stage's artifact is durable remotely
    pub fn upload_field(&self) -> JobField {
        JobField::upload_flag(self.artifact_kind())
    }

    pub fn artifact_kind(&self) -> ArtifactKind {
        match self {
            Self::OriginalArea => ArtifactKind::OriginalArea,
            Self::SimulatedArea => ArtifactKind::SimulatedArea,
            Self::Defoliation => ArtifactKind::Defoliation,
        }
    }

    /// Stage that produces a given output flag
    pub fn producing(field: JobField) -> Option<Self> {
        Self::all().iter().copied().find(|s| s.output_field() == field)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = LeafError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| LeafError::UnknownStage(s.to_string()))
    }
}

/// Flag recording the presence of a stage parameter
pub fn param_field(param: &str) -> Option<JobField> {
    match param {
        "leaf_number" => Some(JobField::InLeafNumber),
        "leaf_widths" => Some(JobField::InLeafWidths),
        "video" => Some(JobField::InVideo),
        "length" => Some(JobField::InLength),
        "original_area" => Some(JobField::OutOriginal),
        "simulated_area" => Some(JobField::OutSimulated),
        _ => None,
    }
}

/// Convenience lookup by stage name
pub fn schema_for(stage: &str) -> LeafResult<&'static StageSchema> {
    Ok(stage.parse::<Stage>()?.schema())
}
