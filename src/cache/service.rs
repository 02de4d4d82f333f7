//! Typed stage state over the artifact store

use crate::artifact::ArtifactStore;
use crate::cache::schema::{param_field, Stage};
use crate::cache::state::{empty_results, sanitize, StageState, StageStatus};
use crate::deps::DependencyResolver;
use crate::error::{LeafError, LeafResult};
use crate::meta::{JobField, MetaStore};
use crate::upload::Uploader;
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// Loads, saves and updates stage artifacts while keeping job flags in step
///
/// Every read-modify-write of stage state runs under `write_lock`, so a
/// stage task can never overwrite parameters that changed while it was
/// computing. The lock is never held while a model runs.
pub struct CacheService {
    store: Arc<dyn ArtifactStore>,
    meta: Arc<MetaStore>,
    resolver: Arc<DependencyResolver>,
    uploader: Arc<Uploader>,
    write_lock: Mutex<()>,
}

impl CacheService {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        meta: Arc<MetaStore>,
        resolver: Arc<DependencyResolver>,
        uploader: Arc<Uploader>,
    ) -> Self {
        Self {
            store,
            meta,
            resolver,
            uploader,
            write_lock: Mutex::new(()),
        }
    }

    pub fn meta(&self) -> &Arc<MetaStore> {
        &self.meta
    }

    pub fn resolver(&self) -> &Arc<DependencyResolver> {
        &self.resolver
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Current state of a stage; an absent artifact reads as empty `waiting`
    pub async fn load(&self, entry_id: &str, stage: Stage) -> LeafResult<StageState> {
        let name = stage.artifact_kind().file_name(entry_id);
        let state = match self.store.get(entry_id, &name).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(LeafError::ArtifactNotFound(_)) => return Ok(StageState::default()),
            Err(e) => return Err(e),
        };
        Ok(sanitize(stage, state))
    }

    /// Persist a stage artifact and account for its bytes
    ///
    /// A `completed` artifact is also queued for upload. Fails with
    /// [`LeafError::CapacityExhausted`] when the write cannot fit the
    /// budget.
    pub async fn save(&self, entry_id: &str, stage: Stage, state: &mut StageState) -> LeafResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write(entry_id, stage, state).await
    }

    /// Save `state` only if the stored parameters still equal its own
    ///
    /// On success `flags` are applied in the same critical section. Returns
    /// `false` (writing nothing) when the parameters changed underneath.
    pub async fn commit(
        &self,
        entry_id: &str,
        stage: Stage,
        state: &mut StageState,
        flags: &[(JobField, bool)],
    ) -> LeafResult<bool> {
        let _guard = self.write_lock.lock().await;
        let current = sanitize(stage, self.load(entry_id, stage).await?);
        if current.params != sanitize(stage, state.clone()).params {
            return Ok(false);
        }
        self.write(entry_id, stage, state).await?;
        if !flags.is_empty() {
            self.meta.set_flags(entry_id, flags)?;
        }
        Ok(true)
    }

    /// Apply `flags` only if the stored state still matches `state`
    pub async fn confirm(
        &self,
        entry_id: &str,
        stage: Stage,
        state: &StageState,
        flags: &[(JobField, bool)],
    ) -> LeafResult<bool> {
        let _guard = self.write_lock.lock().await;
        if !self.is_current(entry_id, stage, state).await? {
            return Ok(false);
        }
        self.meta.set_flags(entry_id, flags)?;
        Ok(true)
    }

    /// Whether the stored state has the same status and parameters
    async fn is_current(&self, entry_id: &str, stage: Stage, state: &StageState) -> LeafResult<bool> {
        let current = self.load(entry_id, stage).await?;
        let ours = sanitize(stage, state.clone());
        Ok(current.status == ours.status && sanitize(stage, current).params == ours.params)
    }

    #[instrument(skip(self, state))]
    async fn write(&self, entry_id: &str, stage: Stage, state: &mut StageState) -> LeafResult<()> {
        state.last_updated = Some(Utc::now());
        let kind = stage.artifact_kind();
        let name = kind.file_name(entry_id);

        let body = serde_json::to_vec_pretty(state)?;
        self.store.put(entry_id, &name, &body).await?;
        self.meta.update_bytes(entry_id).await?;
        debug!(entry_id, %stage, "Saved stage artifact");

        if state.status == StageStatus::Completed {
            let path = self.store.path_of(entry_id, &name)?;
            self.uploader.schedule_upload(entry_id, kind, path);
        }
        Ok(())
    }

    /// Apply parameter changes to a stage
    ///
    /// Returns `None` when no declared parameter actually changed; nothing
    /// is written in that case. Otherwise results are cleared, the status
    /// is recomputed, the stage's output flag and everything downstream of
    /// it are cleared, and each changed parameter's presence flag follows
    /// its new value.
    #[instrument(skip(self, new_params))]
    pub async fn update(
        &self,
        entry_id: &str,
        stage: Stage,
        new_params: &Map<String, Value>,
    ) -> LeafResult<Option<StageState>> {
        let _guard = self.write_lock.lock().await;
        let mut state = sanitize(stage, self.load(entry_id, stage).await?);

        let changed: Vec<(&str, Value)> = stage
            .schema()
            .params
            .iter()
            .filter_map(|key| {
                let value = new_params.get(*key)?;
                (state.param(key) != value).then(|| (*key, value.clone()))
            })
            .collect();

        if changed.is_empty() {
            debug!(entry_id, %stage, "Parameters unchanged");
            return Ok(None);
        }

        for (key, value) in &changed {
            state.params.insert(key.to_string(), value.clone());
        }
        state.results = empty_results(stage);
        state.status = if state.params_complete(stage) {
            StageStatus::Ready
        } else {
            StageStatus::Waiting
        };

        // Flags go first so eviction during the write sees the job as dirty
        let mut flags: Vec<(JobField, bool)> = vec![(stage.output_field(), false)];
        flags.extend(
            changed
                .iter()
                .filter_map(|(key, value)| param_field(key).map(|f| (f, !value.is_null()))),
        );
        self.meta.set_flags(entry_id, &flags)?;
        self.resolver.invalidate(entry_id, stage.output_field())?;
        self.write(entry_id, stage, &mut state).await?;

        info!(
            entry_id,
            %stage,
            status = %state.status,
            changed = ?changed.iter().map(|(k, _)| *k).collect::<Vec<_>>(),
            "Stage parameters updated"
        );
        Ok(Some(state))
    }

    /// Drop every artifact and job record
    pub async fn clear(&self) -> LeafResult<()> {
        self.meta.clear_all().await
    }
}
