//! Persisted stage state

use crate::cache::schema::Stage;
use crate::error::LeafResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Lifecycle of one stage artifact
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Some declared parameter is still null
    #[default]
    Waiting,
    /// Every parameter present, result not computed yet
    Ready,
    Completed,
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Ready => "ready",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// JSON body of a stage artifact
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageState {
    #[serde(default)]
    pub status: StageStatus,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub results: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl StageState {
    pub fn param(&self, key: &str) -> &Value {
        self.params.get(key).unwrap_or(&Value::Null)
    }

    pub fn result(&self, key: &str) -> &Value {
        self.results.get(key).unwrap_or(&Value::Null)
    }

    /// Numeric result, if one has been stored
    pub fn result_f64(&self, key: &str) -> Option<f64> {
        self.result(key).as_f64()
    }

    /// Whether every declared parameter of `stage` is non-null
    pub fn params_complete(&self, stage: Stage) -> bool {
        stage
            .schema()
            .params
            .iter()
            .all(|key| !self.param(key).is_null())
    }
}

/// Restrict `params`/`results` to exactly the declared keys of `stage`
///
/// Undeclared keys are dropped, missing ones are filled with `null`.
pub fn sanitize(stage: Stage, mut state: StageState) -> StageState {
    let schema = stage.schema();
    state.params = restrict(&state.params, schema.params);
    state.results = restrict(&state.results, schema.results);
    state
}

/// [`sanitize`] with the stage given by name
pub fn sanitize_named(stage: &str, state: StageState) -> LeafResult<StageState> {
    Ok(sanitize(stage.parse()?, state))
}

/// Declared keys of `stage` with every value null
pub fn empty_results(stage: Stage) -> Map<String, Value> {
    restrict(&Map::new(), stage.schema().results)
}

fn restrict(map: &Map<String, Value>, keys: &[&str]) -> Map<String, Value> {
    keys.iter()
        .map(|key| {
            let value = map.get(*key).cloned().unwrap_or(Value::Null);
            (key.to_string(), value)
        })
        .collect()
}
