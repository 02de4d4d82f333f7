//! Upload pipeline
//!
//! Moves finished artifacts to the remote store. Each `(entry, kind)` has
//! at most one transfer queued or running; a repeated schedule is dropped.
//!
//! A transfer reads the file once, hashes those bytes and sends them, up to
//! `max_attempts` times with a fixed backoff. Only after the remote store
//! accepts the artifact (and, if enabled, reports the same checksum) is the
//! upload flag set and the job offered for finalization. If the file was
//! rewritten while in flight (a stage recomputed, and its own schedule was
//! dropped as a duplicate) the new content is sent before the flag is set.
//! When every attempt fails the flag stays unset, so the job is never
//! considered safe to evict.

pub mod remote;

pub use remote::{HttpRemoteStore, RemoteStore, UploadReceipt, UploadRequest};

use crate::artifact::ArtifactKind;
use crate::config::UploadConfig;
use crate::error::{LeafError, LeafResult};
use crate::meta::{JobField, MetaStore};
use crate::pipeline::pool::TaskPool;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

/// Retry behavior of one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub verify_checksum: bool,
}

impl From<&UploadConfig> for UploadPolicy {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff(),
            verify_checksum: config.verify_checksum,
        }
    }
}

/// Schedules and runs artifact transfers
pub struct Uploader {
    remote: Arc<dyn RemoteStore>,
    meta: Arc<MetaStore>,
    pool: TaskPool<(String, ArtifactKind)>,
    policy: UploadPolicy,
}

impl Uploader {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        meta: Arc<MetaStore>,
        workers: usize,
        policy: UploadPolicy,
    ) -> Self {
        Self {
            remote,
            meta,
            pool: TaskPool::new("uploads", workers),
            policy,
        }
    }

    /// Queue a transfer of `local_path`; `false` if one is already pending
    pub fn schedule_upload(
        self: &Arc<Self>,
        entry_id: &str,
        kind: ArtifactKind,
        local_path: PathBuf,
    ) -> bool {
        let this = Arc::clone(self);
        let entry = entry_id.to_string();

        self.pool.schedule((entry_id.to_string(), kind), async move {
            this.upload_and_mark(&entry, kind, &local_path).await;
        })
    }

    /// Whether a transfer for this artifact is queued or running
    pub fn is_pending(&self, entry_id: &str, kind: ArtifactKind) -> bool {
        self.pool.is_scheduled(&(entry_id.to_string(), kind))
    }

    /// Number of queued or running transfers
    pub fn pending(&self) -> usize {
        self.pool.len()
    }

    pub async fn wait_idle(&self) {
        self.pool.wait_idle().await
    }

    /// Clear the remote store
    pub async fn reset_remote(&self) -> LeafResult<()> {
        self.remote.reset().await?;
        info!("Remote store reset");
        Ok(())
    }

    /// Run one transfer to completion; returns whether it succeeded
    pub async fn upload_and_mark(&self, entry_id: &str, kind: ArtifactKind, path: &Path) -> bool {
        loop {
            let sent = match self.transfer(entry_id, kind, path).await {
                Ok(digest) => digest,
                Err(e) => {
                    error!(entry_id, %kind, error = %e, "Upload abandoned");
                    return false;
                }
            };
            match sha256_file(path).await {
                Ok(current) if current == sent => break,
                Ok(_) => info!(entry_id, %kind, "Artifact rewritten during upload, sending again"),
                Err(e) => {
                    warn!(entry_id, %kind, error = %e, "Artifact gone after upload");
                    return false;
                }
            }
        }

        if let Err(e) = self.meta.set_flag(entry_id, JobField::upload_flag(kind), true) {
            error!(entry_id, %kind, error = %e, "Failed to record upload");
            return false;
        }
        match self.meta.finalize_if_complete(entry_id).await {
            Ok(true) => debug!(entry_id, "Job finalized after upload"),
            Ok(false) => {}
            Err(e) => warn!(entry_id, error = %e, "Finalize after upload failed"),
        }
        true
    }

    /// Send the current content of `path`; returns the digest of what was sent
    async fn transfer(&self, entry_id: &str, kind: ArtifactKind, path: &Path) -> LeafResult<String> {
        let body: Arc<[u8]> = tokio::fs::read(path)
            .await
            .map_err(|e| LeafError::io(format!("reading {}", path.display()), e))?
            .into();
        let local = hex::encode(Sha256::digest(&body));
        let request = UploadRequest {
            entry_id: entry_id.to_string(),
            kind,
            body,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = self
                .remote
                .upload(&request)
                .await
                .and_then(|receipt| self.verify(&request, &local, receipt));

            match outcome {
                Ok(()) => {
                    info!(entry_id, %kind, attempt, "Uploaded artifact");
                    return Ok(local);
                }
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    warn!(
                        entry_id,
                        %kind,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "Upload attempt failed, retrying"
                    );
                    tokio::time::sleep(self.policy.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn verify(&self, request: &UploadRequest, local: &str, receipt: UploadReceipt) -> LeafResult<()> {
        if !self.policy.verify_checksum {
            return Ok(());
        }
        match receipt.checksum {
            Some(remote) if !remote.eq_ignore_ascii_case(local) => Err(LeafError::ChecksumMismatch {
                artifact: request.kind.file_name(&request.entry_id),
                local: local.to_string(),
                remote,
            }),
            _ => Ok(()),
        }
    }
}

/// Hex SHA-256 of a file, read in chunks
pub async fn sha256_file(path: &Path) -> LeafResult<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| LeafError::io(format!("opening {}", path.display()), e))?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| LeafError::io(format!("reading {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
