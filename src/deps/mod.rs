//! Stage dependency resolution
//!
//! Two static graphs over job flags decide when a stage can run and which
//! flags go stale when something changes.
//!
//! ```text
//! in_leaf_number ─┐
//! in_leaf_widths ─┴─> out_original ─┐
//!                                   ├─> out_defoliation
//! in_video ──┬──────> out_simulated ┘
//! in_length ─┘
//! ```
//!
//! Each upload flag depends on the flag of the artifact it carries.

pub mod graph;

pub use graph::{DependencyGraph, Readiness};

use crate::error::LeafResult;
use crate::meta::{JobField, MetaStore};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Client route that supplies a raw input
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReuploadRoute {
    Video,
    Params,
}

impl fmt::Display for ReuploadRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Params => write!(f, "params"),
        }
    }
}

/// Routes a client must call again to supply `missing` inputs
pub fn reupload_routes(missing: &[JobField]) -> Vec<ReuploadRoute> {
    let routes: BTreeSet<_> = missing
        .iter()
        .filter_map(|field| match field {
            JobField::InVideo => Some(ReuploadRoute::Video),
            JobField::InLength | JobField::InLeafNumber | JobField::InLeafWidths => {
                Some(ReuploadRoute::Params)
            }
            _ => None,
        })
        .collect();
    routes.into_iter().collect()
}

/// Answers readiness and invalidation questions against live job flags
pub struct DependencyResolver {
    graph: Arc<DependencyGraph>,
    meta: Arc<MetaStore>,
}

impl DependencyResolver {
    pub fn new(graph: Arc<DependencyGraph>, meta: Arc<MetaStore>) -> Self {
        Self { graph, meta }
    }

    /// Whether `field` can be produced for this job right now
    pub fn dependencies_ready(&self, entry_id: &str, field: JobField) -> LeafResult<Readiness> {
        let record = self.meta.get(entry_id)?;
        let readiness = self.graph.readiness(&record, field);
        debug!(entry_id, %field, ?readiness, "Resolved dependencies");
        Ok(readiness)
    }

    /// Transitive set of fields that go stale when `field` changes
    pub fn dependents(&self, field: JobField) -> Vec<JobField> {
        self.graph.dependents(field)
    }

    /// Clear every flag downstream of `field`; returns the cleared fields
    pub fn invalidate(&self, entry_id: &str, field: JobField) -> LeafResult<Vec<JobField>> {
        let stale = self.dependents(field);
        let updates: Vec<(JobField, bool)> = stale.iter().map(|f| (*f, false)).collect();
        self.meta.set_flags(entry_id, &updates)?;
        debug!(entry_id, %field, ?stale, "Invalidated dependents");
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::FilesystemStore;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn resolver() -> (DependencyResolver, Arc<MetaStore>, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FilesystemStore::new(temp.path()).await.unwrap());
        let meta = Arc::new(MetaStore::new(store, 1000, Duration::from_secs(60)));
        let resolver =
            DependencyResolver::new(Arc::new(DependencyGraph::standard()), meta.clone());
        (resolver, meta, temp)
    }

    #[test]
    fn routes_for_missing_inputs() {
        assert_eq!(
            reupload_routes(&[JobField::InLength, JobField::InVideo, JobField::InLeafWidths]),
            vec![ReuploadRoute::Video, ReuploadRoute::Params]
        );
        assert!(reupload_routes(&[JobField::OutOriginal]).is_empty());
    }

    #[tokio::test]
    async fn readiness_reads_live_flags() {
        let (resolver, meta, _temp) = resolver().await;

        let before = resolver
            .dependencies_ready("J1", JobField::OutOriginal)
            .unwrap();
        assert!(!before.ready);

        meta.set_flags(
            "J1",
            &[(JobField::InLeafNumber, true), (JobField::InLeafWidths, true)],
        )
        .unwrap();

        let after = resolver
            .dependencies_ready("J1", JobField::OutOriginal)
            .unwrap();
        assert!(after.ready);
    }

    #[tokio::test]
    async fn invalidating_original_leaves_simulated() {
        let (resolver, meta, _temp) = resolver().await;
        let all: Vec<(JobField, bool)> = JobField::all().iter().map(|f| (*f, true)).collect();
        meta.set_flags("J1", &all).unwrap();

        resolver.invalidate("J1", JobField::OutOriginal).unwrap();

        let record = meta.get("J1").unwrap();
        assert!(!record.out_defoliation);
        assert!(!record.up_original && !record.up_defoliation);
        assert!(record.out_original, "the changed field itself is left to the caller");
        assert!(record.out_simulated && record.up_simulated);
    }
}
