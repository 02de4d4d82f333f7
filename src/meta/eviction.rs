//! Byte-budget eviction
//!
//! Runs whenever resident bytes exceed the budget. Jobs are scanned from
//! least to most recently touched; a job is only ever touched when it is
//! evictable (no running stage task, every upload durable).
//!
//! | Job state | Action |
//! |-----------|--------|
//! | results not fetched | delete artifacts, keep record |
//! | results fetched | purge record and artifacts |
//! | inference running / upload pending | skip |
//! | job whose bytes triggered the run | skip |
//!
//! If no evictable job is left while still over budget the triggering
//! write fails with [`LeafError::CapacityExhausted`]; the budget is never
//! silently exceeded.

use crate::error::{LeafError, LeafResult};
use crate::meta::store::{MetaIndex, MetaStore};
use std::collections::HashSet;
use tracing::{info, warn};

/// What one eviction run removed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EvictionReport {
    /// Jobs whose artifacts were deleted, record kept
    pub trimmed: Vec<String>,
    /// Jobs purged entirely
    pub purged: Vec<String>,
    /// Bytes released
    pub freed_bytes: u64,
}

impl EvictionReport {
    pub fn is_empty(&self) -> bool {
        self.trimmed.is_empty() && self.purged.is_empty()
    }
}

#[derive(Debug)]
enum Victim {
    Trim(String),
    Purge(String),
}

impl MetaStore {
    /// Evict until resident bytes fit the budget
    pub async fn run_gc(&self) -> LeafResult<EvictionReport> {
        let _guard = self.bytes_lock.lock().await;
        self.run_gc_locked(None).await
    }

    /// Eviction loop; the caller holds `bytes_lock`
    ///
    /// `writer` is never chosen as a victim: its flags may not yet reflect
    /// the artifact that was just counted.
    pub(super) async fn run_gc_locked(&self, writer: Option<&str>) -> LeafResult<EvictionReport> {
        let mut report = EvictionReport::default();
        let mut visited: HashSet<String> = writer.map(str::to_string).into_iter().collect();

        loop {
            let (victim, before) = {
                let index = self.index();
                if index.total_bytes <= self.budget {
                    return Ok(report);
                }
                match select_victim(&index, &visited) {
                    Some(victim) => (victim, index.total_bytes),
                    None => {
                        warn!(
                            total = index.total_bytes,
                            budget = self.budget,
                            "Cache over budget with no evictable job"
                        );
                        return Err(LeafError::CapacityExhausted {
                            total: index.total_bytes,
                            budget: self.budget,
                        });
                    }
                }
            };

            match victim {
                Victim::Trim(entry_id) => {
                    self.store.delete(&entry_id, None).await?;
                    let size = self.store.compute_size(&entry_id).await?;
                    self.index().set_bytes(&entry_id, size);
                    info!(entry_id = %entry_id, "Evicted intermediate artifacts");
                    visited.insert(entry_id.clone());
                    report.trimmed.push(entry_id);
                }
                Victim::Purge(entry_id) => {
                    self.store.delete(&entry_id, None).await?;
                    self.index().remove(&entry_id);
                    info!(entry_id = %entry_id, "Evicted job");
                    visited.insert(entry_id.clone());
                    report.purged.push(entry_id);
                }
            }

            report.freed_bytes += before.saturating_sub(self.total_bytes());
        }
    }
}

/// Least recently touched evictable job that still holds bytes
fn select_victim(index: &MetaIndex, visited: &HashSet<String>) -> Option<Victim> {
    let mut candidates: Vec<_> = index
        .jobs
        .values()
        .filter(|r| r.bytes > 0 && !visited.contains(&r.entry_id))
        .collect();
    candidates.sort_by_key(|r| r.touched);

    candidates
        .into_iter()
        .find(|r| r.is_evictable())
        .map(|r| {
            if r.results_fetched {
                Victim::Purge(r.entry_id.clone())
            } else {
                Victim::Trim(r.entry_id.clone())
            }
        })
}
