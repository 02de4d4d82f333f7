//! Scheduling glue
//!
//! [`Pipeline`] owns every component, constructed once by
//! [`Pipeline::build`] and shared as `Arc`s. Two bounded pools run the
//! work: one for stage computation, one for uploads.
//!
//! ```text
//! submit_params ──> update(original_area, simulated_area) ──> stage tasks
//! submit_video  ──> store blob ──> update(simulated_area) ──> stage task + upload
//! stage done    ──> save(completed) ──> upload
//!               └─> update(defoliation) ──> defoliation task
//! ```

pub mod collaborators;
pub mod pool;
pub mod stages;

pub use collaborators::{AreaModel, CommandModel, CommandScanner, VideoScanner};
pub use pool::TaskPool;
pub use stages::{defoliation_percent, StageRun};

use crate::artifact::{validate_entry_id, ArtifactKind, ArtifactStore, FilesystemStore};
use crate::cache::{CacheService, Stage, StageState};
use crate::config::{Config, ConfigManager};
use crate::deps::{reupload_routes, DependencyGraph, DependencyResolver, ReuploadRoute};
use crate::error::{LeafError, LeafResult};
use crate::meta::{EvictionReport, JobField, JobRecord, MetaStore};
use crate::upload::{HttpRemoteStore, RemoteStore, UploadPolicy, Uploader};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// External dependencies of the pipeline
pub struct Collaborators {
    pub model: Arc<dyn AreaModel>,
    pub scanner: Arc<dyn VideoScanner>,
    pub remote: Arc<dyn RemoteStore>,
}

impl Collaborators {
    /// Command-backed models and the HTTP remote store
    pub fn from_config(config: &Config) -> Self {
        let (model, scanner) = collaborators::from_config(&config.models);
        Self {
            model: Arc::new(model),
            scanner: Arc::new(scanner),
            remote: Arc::new(HttpRemoteStore::new(
                &config.upload.remote_url,
                config.upload.timeout(),
            )),
        }
    }
}

/// Client-supplied measurements; `None` leaves a value unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    pub leaf_number: Option<u32>,
    pub leaf_widths: Option<Vec<f64>>,
    pub length: Option<f64>,
}

impl JobParams {
    pub fn is_empty(&self) -> bool {
        self.leaf_number.is_none() && self.leaf_widths.is_none() && self.length.is_none()
    }
}

/// Answer to a result request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ResultOutcome {
    Completed {
        defoliation: f64,
        expires_at: DateTime<Utc>,
    },
    Queued {
        stages: Vec<Stage>,
        jobs_ahead: usize,
    },
    Waiting {
        missing: Vec<JobField>,
        reupload: Vec<ReuploadRoute>,
    },
}

/// Everything known about one job
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub record: JobRecord,
    pub stages: Vec<(Stage, StageState)>,
}

/// The assembled cache and its worker pools
pub struct Pipeline {
    pub(crate) cache: Arc<CacheService>,
    pub(crate) meta: Arc<MetaStore>,
    pub(crate) resolver: Arc<DependencyResolver>,
    pub(crate) uploader: Arc<Uploader>,
    pub(crate) store: Arc<dyn ArtifactStore>,
    pub(crate) model: Arc<dyn AreaModel>,
    pub(crate) scanner: Arc<dyn VideoScanner>,
    pub(crate) stages: TaskPool<(String, Stage)>,
    pub(crate) scratch_dir: PathBuf,
    snapshot_path: PathBuf,
}

impl Pipeline {
    /// Assemble the pipeline with collaborators taken from `config`
    pub async fn build(config: &Config) -> LeafResult<Arc<Self>> {
        Self::with_collaborators(config, Collaborators::from_config(config)).await
    }

    /// Assemble the pipeline around the given collaborators
    pub async fn with_collaborators(
        config: &Config,
        collaborators: Collaborators,
    ) -> LeafResult<Arc<Self>> {
        ConfigManager::ensure_cache_dirs(config).await?;

        let store: Arc<dyn ArtifactStore> =
            Arc::new(FilesystemStore::new(config.cache.artifacts_dir()).await?);
        let meta = Arc::new(MetaStore::new(
            store.clone(),
            config.cache.max_bytes,
            config.cache.fetched_ttl(),
        ));
        let resolver = Arc::new(DependencyResolver::new(
            Arc::new(DependencyGraph::standard()),
            meta.clone(),
        ));
        let uploader = Arc::new(Uploader::new(
            collaborators.remote,
            meta.clone(),
            config.workers.uploads,
            UploadPolicy::from(&config.upload),
        ));
        let cache = Arc::new(CacheService::new(
            store.clone(),
            meta.clone(),
            resolver.clone(),
            uploader.clone(),
        ));

        debug!(
            root = %config.cache.root.display(),
            budget = config.cache.max_bytes,
            "Pipeline assembled"
        );

        Ok(Arc::new(Self {
            cache,
            meta,
            resolver,
            uploader,
            store,
            model: collaborators.model,
            scanner: collaborators.scanner,
            stages: TaskPool::new("stages", config.workers.stages),
            scratch_dir: config.cache.scratch_dir(),
            snapshot_path: config.cache.snapshot_path(),
        }))
    }

    pub fn cache(&self) -> &Arc<CacheService> {
        &self.cache
    }

    pub fn meta(&self) -> &Arc<MetaStore> {
        &self.meta
    }

    pub fn uploader(&self) -> &Arc<Uploader> {
        &self.uploader
    }

    /// Restore job metadata saved by a previous run
    pub async fn load_state(&self) -> LeafResult<()> {
        self.meta.load_snapshot(&self.snapshot_path).await
    }

    /// Persist job metadata for the next run
    pub async fn save_state(&self) -> LeafResult<()> {
        self.meta.save_snapshot(&self.snapshot_path).await
    }

    /// Record client measurements and schedule the stages they changed
    pub async fn submit_params(self: &Arc<Self>, entry_id: &str, params: &JobParams) -> LeafResult<Vec<Stage>> {
        validate_entry_id(entry_id)?;
        let mut changed = Vec::new();

        let mut original = Map::new();
        if let Some(n) = params.leaf_number {
            original.insert("leaf_number".into(), json!(n));
        }
        if let Some(widths) = &params.leaf_widths {
            original.insert("leaf_widths".into(), json!(widths));
        }
        if self
            .cache
            .update(entry_id, Stage::OriginalArea, &original)
            .await?
            .is_some()
        {
            changed.push(Stage::OriginalArea);
        }

        if let Some(length) = params.length {
            let mut simulated = Map::new();
            simulated.insert("length".into(), json!(length));
            if self
                .cache
                .update(entry_id, Stage::SimulatedArea, &simulated)
                .await?
                .is_some()
            {
                changed.push(Stage::SimulatedArea);
            }
        }

        for stage in &changed {
            self.schedule_stage(entry_id, *stage);
        }

        info!(entry_id, ?changed, "Parameters submitted");
        Ok(changed)
    }

    /// Store a scan video, queue its upload and the simulated-area stage
    ///
    /// The stored parameter is the content hash, so re-sending the same
    /// video changes nothing. A video that cannot fit the byte budget is
    /// removed again and the capacity error returned.
    pub async fn submit_video(self: &Arc<Self>, entry_id: &str, video: &[u8]) -> LeafResult<bool> {
        validate_entry_id(entry_id)?;
        let kind = ArtifactKind::Video;
        let name = kind.file_name(entry_id);
        let digest = hex::encode(Sha256::digest(video));

        // A new blob is not durable yet; eviction must not see the job as safe
        let stored = self.cache.load(entry_id, Stage::SimulatedArea).await?;
        let was_uploaded = self
            .meta
            .find(entry_id)
            .is_some_and(|record| record.flag(JobField::UpVideo));
        if stored.param("video").as_str() != Some(digest.as_str()) {
            self.meta.set_flag(entry_id, JobField::UpVideo, false)?;
        }

        self.store.put(entry_id, &name, video).await?;
        if let Err(e) = self.meta.update_bytes(entry_id).await {
            if matches!(e, LeafError::CapacityExhausted { .. }) {
                self.store.delete(entry_id, Some(&name)).await?;
                if let Err(recount) = self.meta.update_bytes(entry_id).await {
                    warn!(entry_id, error = %recount, "Byte recount after rejected video failed");
                }
                // The previous video is still the one held remotely
                self.meta.set_flag(entry_id, JobField::UpVideo, was_uploaded)?;
            }
            return Err(e);
        }

        let mut params = Map::new();
        params.insert("video".into(), Value::String(digest));
        let changed = self
            .cache
            .update(entry_id, Stage::SimulatedArea, &params)
            .await?
            .is_some();

        if !self.meta.flag(entry_id, JobField::UpVideo)? {
            let path = self.store.path_of(entry_id, &name)?;
            self.uploader.schedule_upload(entry_id, kind, path);
        }
        self.schedule_stage(entry_id, Stage::SimulatedArea);

        info!(entry_id, bytes = video.len(), changed, "Video submitted");
        Ok(changed)
    }

    /// Return the defoliation result if known, else explain what is pending
    pub async fn request_result(self: &Arc<Self>, entry_id: &str) -> LeafResult<ResultOutcome> {
        let record = self.meta.get(entry_id)?;
        if let (true, Some(defoliation)) = (record.out_defoliation, record.defoliation_result) {
            let expires_at = self.meta.mark_results_fetched(entry_id)?;
            return Ok(ResultOutcome::Completed {
                defoliation,
                expires_at,
            });
        }

        let readiness = self
            .resolver
            .dependencies_ready(entry_id, JobField::OutDefoliation)?;
        if !readiness.ready {
            return Ok(ResultOutcome::Waiting {
                reupload: reupload_routes(&readiness.missing),
                missing: readiness.missing,
            });
        }

        let mut stages: Vec<Stage> = readiness
            .rerunnable
            .iter()
            .filter_map(|field| Stage::producing(*field))
            .collect();
        stages.push(Stage::Defoliation);
        let jobs_ahead = self.stages.len();
        for stage in &stages {
            self.schedule_stage(entry_id, *stage);
        }

        Ok(ResultOutcome::Queued { stages, jobs_ahead })
    }

    /// Snapshot of a job and its stage artifacts, if the job is known
    pub async fn status(&self, entry_id: &str) -> LeafResult<Option<JobStatus>> {
        validate_entry_id(entry_id)?;
        let Some(record) = self.meta.find(entry_id) else {
            return Ok(None);
        };

        let mut stages = Vec::new();
        for stage in Stage::all() {
            stages.push((*stage, self.cache.load(entry_id, *stage).await?));
        }
        Ok(Some(JobStatus { record, stages }))
    }

    /// Queue every stage of a known job again
    ///
    /// Queued work does not survive the process, and a schedule that lands
    /// while the same task is finishing is dropped. Completed stages re-run
    /// cheaply: they re-assert their flags and re-queue missing uploads.
    pub fn resume(self: &Arc<Self>, entry_id: &str) -> LeafResult<Vec<Stage>> {
        validate_entry_id(entry_id)?;
        let Some(record) = self.meta.find(entry_id) else {
            return Ok(Vec::new());
        };
        // Finalized jobs keep their stage artifacts only remotely
        if record.outputs_complete() && record.uploads_complete() {
            return Ok(Vec::new());
        }
        let queued: Vec<Stage> = Stage::all()
            .iter()
            .copied()
            .filter(|stage| self.schedule_stage(entry_id, *stage))
            .collect();
        debug!(entry_id, ?queued, "Job resumed");
        Ok(queued)
    }

    /// Whether a stage task is queued or running
    pub fn is_scheduled(&self, entry_id: &str, stage: Stage) -> bool {
        self.stages.is_scheduled(&(entry_id.to_string(), stage))
    }

    /// Wait until no stage task or upload is queued or running
    pub async fn wait_idle(&self) {
        loop {
            self.stages.wait_idle().await;
            self.uploader.wait_idle().await;
            if self.stages.is_empty() && self.uploader.pending() == 0 {
                return;
            }
        }
    }

    /// Evict down to the byte budget
    pub async fn gc(&self) -> LeafResult<EvictionReport> {
        self.meta.run_gc().await
    }

    /// Forget derived state of a job, keeping its raw inputs
    pub async fn reset(&self, entry_id: &str) -> LeafResult<()> {
        self.meta.reset(entry_id).await
    }

    /// Wipe the local cache, and the remote store when `remote` is set
    pub async fn clear(&self, remote: bool) -> LeafResult<()> {
        self.cache.clear().await?;
        if remote {
            self.uploader.reset_remote().await?;
        }
        Ok(())
    }

    /// Periodically purge fetched jobs whose expiry has passed
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match this.meta.purge_expired().await {
                    Ok(0) => {}
                    Ok(n) => info!(purged = n, "Expired jobs purged"),
                    Err(e) => warn!(error = %e, "Expiry sweep failed"),
                }
            }
        })
    }
}
