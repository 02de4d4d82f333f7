//! Job metadata store
//!
//! Holds one [`JobRecord`] per job plus global byte accounting. Each public
//! method performs its record mutation inside a single short critical
//! section, so concurrent stage completions on the same job never lose an
//! update. Operations that change resident bytes (size recompute, eviction,
//! finalize, purge) are additionally serialized by `bytes_lock`, which is
//! also what keeps eviction from running concurrently with itself.

use crate::artifact::{validate_entry_id, ArtifactStore};
use crate::error::{LeafError, LeafResult};
use crate::meta::record::{JobField, JobRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

/// In-memory index guarded by the store mutex
#[derive(Debug, Default, Serialize, Deserialize)]
pub(super) struct MetaIndex {
    pub(super) jobs: HashMap<String, JobRecord>,
    pub(super) total_bytes: u64,
    pub(super) clock: u64,
}

impl MetaIndex {
    /// Record for `entry_id`, created zero-valued on first access
    fn record(&mut self, entry_id: &str) -> &mut JobRecord {
        let clock = &mut self.clock;
        self.jobs.entry(entry_id.to_string()).or_insert_with(|| {
            *clock += 1;
            let mut record = JobRecord::new(entry_id);
            record.touched = *clock;
            debug!(entry_id, "Created job record");
            record
        })
    }

    /// Record with its recency bumped
    fn touch(&mut self, entry_id: &str) -> &mut JobRecord {
        self.record(entry_id);
        self.clock += 1;
        let clock = self.clock;
        let record = self.record(entry_id);
        record.touched = clock;
        record.last_updated = Utc::now();
        record
    }

    /// Remove a record and its bytes from the total
    pub(super) fn remove(&mut self, entry_id: &str) -> Option<JobRecord> {
        let record = self.jobs.remove(entry_id)?;
        self.total_bytes = self.total_bytes.saturating_sub(record.bytes);
        Some(record)
    }

    /// Set a job's resident size, keeping the total in step
    pub(super) fn set_bytes(&mut self, entry_id: &str, bytes: u64) {
        let record = self.record(entry_id);
        let old = record.bytes;
        record.bytes = bytes;
        self.total_bytes = self.total_bytes.saturating_sub(old) + bytes;
    }
}

/// Metadata store with byte-budget eviction
pub struct MetaStore {
    pub(super) store: Arc<dyn ArtifactStore>,
    pub(super) budget: u64,
    fetched_ttl: Duration,
    pub(super) index: Mutex<MetaIndex>,
    pub(super) bytes_lock: tokio::sync::Mutex<()>,
}

impl MetaStore {
    /// Create an empty store
    pub fn new(store: Arc<dyn ArtifactStore>, budget: u64, fetched_ttl: Duration) -> Self {
        Self {
            store,
            budget,
            fetched_ttl,
            index: Mutex::new(MetaIndex::default()),
            bytes_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub(super) fn index(&self) -> MutexGuard<'_, MetaIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lazily create the record for a job
    pub fn ensure_exists(&self, entry_id: &str) -> LeafResult<()> {
        validate_entry_id(entry_id)?;
        self.index().record(entry_id);
        Ok(())
    }

    /// Snapshot of a job record
    pub fn get(&self, entry_id: &str) -> LeafResult<JobRecord> {
        validate_entry_id(entry_id)?;
        Ok(self.index().record(entry_id).clone())
    }

    /// Snapshot of a record without creating it
    pub fn find(&self, entry_id: &str) -> Option<JobRecord> {
        self.index().jobs.get(entry_id).cloned()
    }

    /// Current value of one flag
    pub fn flag(&self, entry_id: &str, field: JobField) -> LeafResult<bool> {
        validate_entry_id(entry_id)?;
        Ok(self.index().record(entry_id).flag(field))
    }

    /// Set a flag by name; unknown names are rejected
    pub fn update_field(&self, entry_id: &str, field: &str, value: bool) -> LeafResult<()> {
        let field: JobField = field.parse()?;
        self.set_flag(entry_id, field, value)
    }

    /// Set one flag and touch the job
    pub fn set_flag(&self, entry_id: &str, field: JobField, value: bool) -> LeafResult<()> {
        self.set_flags(entry_id, &[(field, value)])
    }

    /// Set several flags in one atomic step and touch the job
    pub fn set_flags(&self, entry_id: &str, updates: &[(JobField, bool)]) -> LeafResult<()> {
        validate_entry_id(entry_id)?;
        let mut index = self.index();
        let record = index.touch(entry_id);
        for (field, value) in updates {
            record.set_flag(*field, *value);
        }
        debug!(entry_id, ?updates, "Updated job flags");
        Ok(())
    }

    /// Store the final defoliation result
    pub fn set_defoliation_result(&self, entry_id: &str, value: f64) -> LeafResult<()> {
        validate_entry_id(entry_id)?;
        self.index().touch(entry_id).defoliation_result = Some(value);
        Ok(())
    }

    /// Mark a stage task as running for this job
    pub fn begin_inference(&self, entry_id: &str) -> LeafResult<()> {
        validate_entry_id(entry_id)?;
        self.index().touch(entry_id).inflight += 1;
        Ok(())
    }

    /// Mark a stage task as finished for this job
    pub fn end_inference(&self, entry_id: &str) {
        if let Some(record) = self.index().jobs.get_mut(entry_id) {
            record.inflight = record.inflight.saturating_sub(1);
        }
    }

    /// Recompute a job's size from the artifact store and enforce the budget
    ///
    /// Fails with [`LeafError::CapacityExhausted`] when eviction cannot get
    /// back under budget.
    pub async fn update_bytes(&self, entry_id: &str) -> LeafResult<()> {
        validate_entry_id(entry_id)?;
        let _guard = self.bytes_lock.lock().await;

        let size = self.store.compute_size(entry_id).await?;
        {
            let mut index = self.index();
            index.touch(entry_id);
            index.set_bytes(entry_id, size);
            debug!(entry_id, size, total = index.total_bytes, "Updated job bytes");
        }

        self.run_gc_locked(Some(entry_id)).await.map(|_| ())
    }

    /// Purge a job's artifacts once every output and upload is done
    ///
    /// The record itself is kept for recency and expiry bookkeeping.
    pub async fn finalize_if_complete(&self, entry_id: &str) -> LeafResult<bool> {
        let complete = {
            let record = self.get(entry_id)?;
            record.outputs_complete() && record.uploads_complete()
        };
        if !complete {
            return Ok(false);
        }

        let _guard = self.bytes_lock.lock().await;
        self.store.delete(entry_id, None).await?;
        let size = self.store.compute_size(entry_id).await?;
        self.index().set_bytes(entry_id, size);

        info!(entry_id, "Finalized job, local artifacts purged");
        Ok(true)
    }

    /// Record that the client retrieved the result and schedule expiry
    pub fn mark_results_fetched(&self, entry_id: &str) -> LeafResult<DateTime<Utc>> {
        validate_entry_id(entry_id)?;
        let ttl = chrono::Duration::from_std(self.fetched_ttl)
            .map_err(|e| LeafError::Internal(format!("invalid fetched ttl: {e}")))?;

        let mut index = self.index();
        let record = index.touch(entry_id);
        record.results_fetched = true;
        // A second fetch does not extend the window
        let expires_at = *record.expires_at.get_or_insert(Utc::now() + ttl);
        debug!(entry_id, %expires_at, "Results fetched");
        Ok(expires_at)
    }

    /// Recreate a job record, keeping only the raw-input flags
    pub async fn reset(&self, entry_id: &str) -> LeafResult<()> {
        validate_entry_id(entry_id)?;
        {
            let mut index = self.index();
            let inputs: Vec<(JobField, bool)> = match index.remove(entry_id) {
                Some(old) => JobField::inputs()
                    .iter()
                    .map(|f| (*f, old.flag(*f)))
                    .collect(),
                None => Vec::new(),
            };
            let record = index.touch(entry_id);
            for (field, value) in inputs {
                record.set_flag(field, value);
            }
        }

        info!(entry_id, "Reset job record");
        // Artifacts stay on disk; bring the accounting back in line
        self.update_bytes(entry_id).await
    }

    /// Fully purge fetched jobs whose expiry has passed
    pub async fn purge_expired(&self) -> LeafResult<usize> {
        let _guard = self.bytes_lock.lock().await;
        let now = Utc::now();

        let expired: Vec<String> = self
            .index()
            .jobs
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.entry_id.clone())
            .collect();

        for entry_id in &expired {
            self.store.delete(entry_id, None).await?;
            self.index().remove(entry_id);
            info!(entry_id = %entry_id, "Purged expired job");
        }

        Ok(expired.len())
    }

    /// Drop every record and every artifact
    pub async fn clear_all(&self) -> LeafResult<()> {
        let _guard = self.bytes_lock.lock().await;
        self.store.clear().await?;
        *self.index() = MetaIndex::default();
        info!("Cleared all job metadata");
        Ok(())
    }

    /// Bytes resident across all jobs
    pub fn total_bytes(&self) -> u64 {
        self.index().total_bytes
    }

    /// Global byte budget
    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Snapshot of every record, least recently touched first
    pub fn entries(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self.index().jobs.values().cloned().collect();
        records.sort_by_key(|r| r.touched);
        records
    }

    /// Persist the index as JSON (write to temp, then rename)
    pub async fn save_snapshot(&self, path: &Path) -> LeafResult<()> {
        let content = serde_json::to_vec_pretty(&*self.index())?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| LeafError::io(format!("creating {}", parent.display()), e))?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .await
            .map_err(|e| LeafError::io(format!("writing snapshot {}", tmp.display()), e))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| LeafError::io(format!("replacing snapshot {}", path.display()), e))?;

        debug!("Saved metadata snapshot to {}", path.display());
        Ok(())
    }

    /// Load a snapshot written by [`save_snapshot`](Self::save_snapshot)
    ///
    /// A missing file leaves the store empty. In-flight counters never
    /// survive a restart. Byte counts are taken from the artifact store,
    /// since a run that died before saving leaves the snapshot behind disk.
    pub async fn load_snapshot(&self, path: &Path) -> LeafResult<()> {
        if !path.exists() {
            debug!("No metadata snapshot at {}", path.display());
            return Ok(());
        }

        let content = fs::read(path)
            .await
            .map_err(|e| LeafError::io(format!("reading snapshot {}", path.display()), e))?;
        let mut loaded: MetaIndex = serde_json::from_slice(&content)?;
        for (entry_id, record) in loaded.jobs.iter_mut() {
            let size = self.store.compute_size(entry_id).await?;
            if size != record.bytes {
                debug!(entry_id = %entry_id, recorded = record.bytes, size, "Snapshot byte count corrected");
                record.bytes = size;
            }
        }
        loaded.total_bytes = loaded.jobs.values().map(|r| r.bytes).sum();
        loaded.clock = loaded
            .jobs
            .values()
            .map(|r| r.touched)
            .max()
            .unwrap_or(0)
            .max(loaded.clock);

        debug!(jobs = loaded.jobs.len(), "Loaded metadata snapshot");
        *self.index() = loaded;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::FilesystemStore;
    use tempfile::TempDir;

    async fn test_meta(budget: u64) -> (MetaStore, Arc<FilesystemStore>, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FilesystemStore::new(temp.path().join("a")).await.unwrap());
        let meta = MetaStore::new(store.clone(), budget, Duration::from_secs(3600));
        (meta, store, temp)
    }

    #[tokio::test]
    async fn record_created_lazily() {
        let (meta, _store, _temp) = test_meta(1000).await;

        assert!(meta.find("J1").is_none());
        let record = meta.get("J1").unwrap();
        assert_eq!(record.entry_id, "J1");
        assert!(meta.find("J1").is_some());
    }

    #[tokio::test]
    async fn update_field_rejects_unknown_names() {
        let (meta, _store, _temp) = test_meta(1000).await;

        meta.update_field("J1", "out_original", true).unwrap();
        assert!(meta.flag("J1", JobField::OutOriginal).unwrap());

        assert!(matches!(
            meta.update_field("J1", "stage", true),
            Err(LeafError::UnknownField(_))
        ));
    }

    #[tokio::test]
    async fn updates_touch_recency() {
        let (meta, _store, _temp) = test_meta(1000).await;
        meta.ensure_exists("A").unwrap();
        meta.ensure_exists("B").unwrap();

        meta.set_flag("A", JobField::InVideo, true).unwrap();

        let order: Vec<String> = meta.entries().into_iter().map(|r| r.entry_id).collect();
        assert_eq!(order, vec!["B".to_string(), "A".to_string()]);
    }

    #[tokio::test]
    async fn update_bytes_tracks_delta() {
        let (meta, store, _temp) = test_meta(1000).await;

        store.put("J1", "a", &[0u8; 40]).await.unwrap();
        meta.update_bytes("J1").await.unwrap();
        store.put("J2", "a", &[0u8; 25]).await.unwrap();
        meta.update_bytes("J2").await.unwrap();
        assert_eq!(meta.total_bytes(), 65);

        store.put("J1", "a", &[0u8; 10]).await.unwrap();
        meta.update_bytes("J1").await.unwrap();
        assert_eq!(meta.total_bytes(), 35);
        assert_eq!(meta.get("J1").unwrap().bytes, 10);
    }

    #[tokio::test]
    async fn concurrent_flag_updates_are_not_lost() {
        let (meta, _store, _temp) = test_meta(1000).await;
        let meta = Arc::new(meta);

        let a = {
            let meta = meta.clone();
            tokio::spawn(async move { meta.set_flag("J1", JobField::OutOriginal, true) })
        };
        let b = {
            let meta = meta.clone();
            tokio::spawn(async move { meta.set_flag("J1", JobField::OutSimulated, true) })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let record = meta.get("J1").unwrap();
        assert!(record.out_original && record.out_simulated);
    }

    #[tokio::test]
    async fn finalize_requires_all_outputs_and_uploads() {
        let (meta, store, _temp) = test_meta(1000).await;
        store.put("J1", "J1_defoliation.json", b"{}").await.unwrap();
        meta.update_bytes("J1").await.unwrap();

        for field in JobField::outputs() {
            meta.set_flag("J1", *field, true).unwrap();
        }
        assert!(!meta.finalize_if_complete("J1").await.unwrap());

        for field in JobField::uploads() {
            meta.set_flag("J1", *field, true).unwrap();
        }
        assert!(meta.finalize_if_complete("J1").await.unwrap());

        assert!(!store.exists("J1", "J1_defoliation.json").await.unwrap());
        assert_eq!(meta.get("J1").unwrap().bytes, 0);
        assert_eq!(meta.total_bytes(), 0);
    }

    #[tokio::test]
    async fn mark_results_fetched_sets_expiry_once() {
        let (meta, _store, _temp) = test_meta(1000).await;

        let first = meta.mark_results_fetched("J1").unwrap();
        let second = meta.mark_results_fetched("J1").unwrap();

        assert_eq!(first, second);
        let record = meta.get("J1").unwrap();
        assert!(record.results_fetched);
        assert!(first > Utc::now() + chrono::Duration::minutes(59));
    }

    #[tokio::test]
    async fn reset_keeps_only_input_flags() {
        let (meta, store, _temp) = test_meta(1000).await;
        store.put("J1", "J1_video.mp4", &[0u8; 12]).await.unwrap();
        meta.update_bytes("J1").await.unwrap();
        meta.set_flags(
            "J1",
            &[
                (JobField::InVideo, true),
                (JobField::InLength, true),
                (JobField::OutSimulated, true),
                (JobField::UpVideo, true),
            ],
        )
        .unwrap();
        meta.set_defoliation_result("J1", 30.0).unwrap();

        meta.reset("J1").await.unwrap();

        let record = meta.get("J1").unwrap();
        assert!(record.in_video && record.in_length);
        assert!(!record.out_simulated && !record.up_video);
        assert_eq!(record.defoliation_result, None);
        assert_eq!(record.bytes, 12);
        assert_eq!(meta.total_bytes(), 12);
    }

    #[tokio::test]
    async fn purge_expired_removes_only_expired_durable_jobs() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FilesystemStore::new(temp.path()).await.unwrap());
        let meta = MetaStore::new(store.clone(), 1000, Duration::ZERO);

        for id in ["done", "pending"] {
            store.put(id, "x", &[0u8; 5]).await.unwrap();
            meta.update_bytes(id).await.unwrap();
            meta.mark_results_fetched(id).unwrap();
        }
        for field in JobField::uploads() {
            meta.set_flag("done", *field, true).unwrap();
        }

        assert_eq!(meta.purge_expired().await.unwrap(), 1);
        assert!(meta.find("done").is_none());
        assert!(meta.find("pending").is_some());
        assert_eq!(meta.total_bytes(), 5);
    }

    #[tokio::test]
    async fn snapshot_roundtrip_drops_inflight() {
        let (meta, store, temp) = test_meta(1000).await;
        store.put("J1", "x", &[0u8; 7]).await.unwrap();
        meta.update_bytes("J1").await.unwrap();
        meta.set_flag("J1", JobField::OutOriginal, true).unwrap();
        meta.begin_inference("J1").unwrap();

        let path = temp.path().join("meta.json");
        meta.save_snapshot(&path).await.unwrap();

        let restored = MetaStore::new(store, 1000, Duration::from_secs(1));
        restored.load_snapshot(&path).await.unwrap();

        let record = restored.get("J1").unwrap();
        assert!(record.out_original);
        assert_eq!(record.inflight, 0);
        assert_eq!(restored.total_bytes(), 7);
    }

    #[tokio::test]
    async fn snapshot_load_recounts_bytes_from_disk() {
        let (meta, store, temp) = test_meta(1000).await;
        store.put("J1", "x", &[0u8; 7]).await.unwrap();
        meta.update_bytes("J1").await.unwrap();
        let path = temp.path().join("meta.json");
        meta.save_snapshot(&path).await.unwrap();

        // Artifact rewritten by a run that never saved its snapshot
        store.put("J1", "x", &[0u8; 40]).await.unwrap();

        let restored = MetaStore::new(store, 1000, Duration::from_secs(1));
        restored.load_snapshot(&path).await.unwrap();

        assert_eq!(restored.get("J1").unwrap().bytes, 40);
        assert_eq!(restored.total_bytes(), 40);
    }
}
