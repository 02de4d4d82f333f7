//! Stage tasks
//!
//! One task evaluates one `(entry, stage)`. It never runs a collaborator
//! while holding a lock, and it only persists state after the computation
//! succeeded or after marking the stage failed.

use crate::artifact::ArtifactKind;
use crate::cache::{Stage, StageState, StageStatus};
use crate::error::{LeafError, LeafResult};
use crate::meta::JobField;
use crate::pipeline::Pipeline;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How a stage task ended
#[derive(Debug, Clone, PartialEq)]
pub enum StageRun {
    /// Computed now
    Computed(f64),
    /// Already completed; flags re-asserted
    Cached(f64),
    /// Raw inputs (or parameters) are missing; state persisted as waiting
    Waiting(Vec<JobField>),
    /// Upstream stages were scheduled and will trigger this one again
    Deferred(Vec<JobField>),
}

impl Pipeline {
    /// Queue a stage task; `false` if one is already queued or running
    pub fn schedule_stage(self: &Arc<Self>, entry_id: &str, stage: Stage) -> bool {
        let this = Arc::clone(self);
        let entry = entry_id.to_string();

        self.stages.schedule((entry_id.to_string(), stage), async move {
            match this.run_stage(&entry, stage).await {
                Ok(run) => debug!(entry_id = %entry, %stage, ?run, "Stage task finished"),
                Err(e) => error!(entry_id = %entry, %stage, error = %e, "Stage task failed"),
            }
        })
    }

    /// Run one stage task inline, counted as in-flight inference
    pub async fn run_stage(self: &Arc<Self>, entry_id: &str, stage: Stage) -> LeafResult<StageRun> {
        self.meta.begin_inference(entry_id)?;
        let result = self.evaluate(entry_id, stage).await;
        self.meta.end_inference(entry_id);
        result
    }

    /// Evaluate until a pass finishes against parameters nobody changed
    async fn evaluate(self: &Arc<Self>, entry_id: &str, stage: Stage) -> LeafResult<StageRun> {
        loop {
            match self.attempt(entry_id, stage).await? {
                Some(run) => return Ok(run),
                None => debug!(entry_id, %stage, "Parameters changed mid-run, re-evaluating"),
            }
        }
    }

    /// One pass; `None` when the stored parameters changed underneath
    async fn attempt(self: &Arc<Self>, entry_id: &str, stage: Stage) -> LeafResult<Option<StageRun>> {
        let mut state = self.cache.load(entry_id, stage).await?;
        let readiness = self
            .resolver
            .dependencies_ready(entry_id, stage.output_field())?;

        for field in &readiness.rerunnable {
            if let Some(upstream) = Stage::producing(*field) {
                self.schedule_stage(entry_id, upstream);
            }
        }

        if !readiness.ready || !state.params_complete(stage) {
            state.status = StageStatus::Waiting;
            if !self.cache.commit(entry_id, stage, &mut state, &[]).await? {
                return Ok(None);
            }
            info!(entry_id, %stage, missing = ?readiness.missing, "Stage waiting on inputs");
            return Ok(Some(StageRun::Waiting(readiness.missing)));
        }

        // Upstream results are being recomputed; parameters here are stale
        if !readiness.rerunnable.is_empty() {
            debug!(entry_id, %stage, rerunnable = ?readiness.rerunnable, "Stage deferred");
            return Ok(Some(StageRun::Deferred(readiness.rerunnable)));
        }

        if state.status == StageStatus::Completed {
            if let Some(value) = state.result_f64(stage.as_str()) {
                let flags = output_flags(stage);
                if !self.cache.confirm(entry_id, stage, &state, &flags).await? {
                    return Ok(None);
                }
                self.publish(entry_id, stage, value).await?;
                self.ensure_uploaded(entry_id, stage)?;
                info!(entry_id, %stage, value, "Stage result reused");
                return Ok(Some(StageRun::Cached(value)));
            }
            warn!(entry_id, %stage, "Completed stage has no result, recomputing");
        }

        let value = match self.compute(entry_id, stage, &state).await {
            Ok(value) => value,
            Err(e) => {
                state.status = StageStatus::Failed;
                match self.cache.commit(entry_id, stage, &mut state, &[]).await {
                    Ok(true) => {}
                    Ok(false) => return Ok(None),
                    Err(save_err) => {
                        warn!(entry_id, %stage, error = %save_err, "Could not persist failed state")
                    }
                }
                return Err(e);
            }
        };

        state.results.insert(stage.as_str().to_string(), json!(value));
        state.status = StageStatus::Completed;
        if !self
            .cache
            .commit(entry_id, stage, &mut state, &output_flags(stage))
            .await?
        {
            return Ok(None);
        }
        self.publish(entry_id, stage, value).await?;
        self.meta.finalize_if_complete(entry_id).await?;

        info!(entry_id, %stage, value, "Stage computed");
        Ok(Some(StageRun::Computed(value)))
    }

    /// Make a completed result visible downstream
    async fn publish(self: &Arc<Self>, entry_id: &str, stage: Stage, value: f64) -> LeafResult<()> {
        match stage {
            Stage::OriginalArea | Stage::SimulatedArea => {
                let mut params = Map::new();
                params.insert(stage.as_str().to_string(), json!(value));
                self.cache
                    .update(entry_id, Stage::Defoliation, &params)
                    .await?;
                self.schedule_stage(entry_id, Stage::Defoliation);
            }
            Stage::Defoliation => {
                self.meta.set_defoliation_result(entry_id, value)?;
            }
        }
        Ok(())
    }

    /// Re-queue the upload of a completed artifact that never made it
    fn ensure_uploaded(&self, entry_id: &str, stage: Stage) -> LeafResult<()> {
        if self.meta.flag(entry_id, stage.upload_field())? {
            return Ok(());
        }
        let kind = stage.artifact_kind();
        let path = self.store.path_of(entry_id, &kind.file_name(entry_id))?;
        if path.exists() {
            self.uploader.schedule_upload(entry_id, kind, path);
        }
        Ok(())
    }

    /// Run the stage's collaborator on the blocking pool
    async fn compute(&self, entry_id: &str, stage: Stage, state: &StageState) -> LeafResult<f64> {
        let fail = |reason: String| LeafError::computation(stage.as_str(), entry_id, reason);

        let task = match stage {
            Stage::OriginalArea => {
                let leaf_number = leaf_number(state.param("leaf_number")).map_err(fail)?;
                let leaf_widths = number_list(state.param("leaf_widths")).map_err(fail)?;
                let model = self.model.clone();
                tokio::task::spawn_blocking(move || model.predict(leaf_number, &leaf_widths))
            }
            Stage::SimulatedArea => {
                let length = number(state.param("length"), "length").map_err(fail)?;
                let video = self
                    .store
                    .path_of(entry_id, &ArtifactKind::Video.file_name(entry_id))?;
                if !video.exists() {
                    return Err(fail(format!("video not found at {}", video.display())));
                }
                let output_dir = self.scratch_dir.join(entry_id);
                let scanner = self.scanner.clone();
                tokio::task::spawn_blocking(move || scanner.scan(&video, &output_dir, length))
            }
            Stage::Defoliation => {
                let original = number(state.param("original_area"), "original_area").map_err(fail)?;
                let simulated =
                    number(state.param("simulated_area"), "simulated_area").map_err(fail)?;
                return defoliation_percent(original, simulated).map_err(fail);
            }
        };

        task.await
            .map_err(|e| fail(format!("task aborted: {e}")))?
            .map_err(|e| fail(e.to_string()))
    }
}

fn output_flags(stage: Stage) -> [(JobField, bool); 1] {
    [(stage.output_field(), true)]
}

/// Percentage of leaf area lost
pub fn defoliation_percent(original: f64, simulated: f64) -> Result<f64, String> {
    if original == 0.0 {
        return Err("original area is zero".to_string());
    }
    Ok((1.0 - simulated / original) * 100.0)
}

fn number(value: &Value, name: &str) -> Result<f64, String> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| format!("{name} is not a number: {value}"))
}

fn leaf_number(value: &Value) -> Result<u32, String> {
    let n = number(value, "leaf_number")?;
    if n < 0.0 || n.fract() != 0.0 || n > f64::from(u32::MAX) {
        return Err(format!("leaf_number must be a non-negative integer: {value}"));
    }
    Ok(n as u32)
}

fn number_list(value: &Value) -> Result<Vec<f64>, String> {
    value
        .as_array()
        .ok_or_else(|| format!("leaf_widths is not a list: {value}"))?
        .iter()
        .map(|v| number(v, "leaf width"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defoliation_formula() {
        assert_eq!(defoliation_percent(40.0, 30.0).unwrap(), 25.0);
        assert_eq!(defoliation_percent(40.0, 40.0).unwrap(), 0.0);
        assert!(defoliation_percent(0.0, 10.0).is_err());
    }

    #[test]
    fn numeric_params_accept_strings() {
        assert_eq!(number(&json!("12.5"), "length").unwrap(), 12.5);
        assert_eq!(number(&json!(3), "length").unwrap(), 3.0);
        assert!(number(&Value::Null, "length").is_err());
    }

    #[test]
    fn leaf_number_must_be_whole() {
        assert_eq!(leaf_number(&json!(3)).unwrap(), 3);
        assert!(leaf_number(&json!(2.5)).is_err());
        assert!(leaf_number(&json!(-1)).is_err());
    }

    #[test]
    fn leaf_widths_must_be_numbers() {
        assert_eq!(number_list(&json!([1, 2.5])).unwrap(), vec![1.0, 2.5]);
        assert!(number_list(&json!([1, "x"])).is_err());
        assert!(number_list(&json!(4)).is_err());
    }
}
