//! Test doubles for the remote store and the model collaborators

use crate::artifact::ArtifactKind;
use crate::error::{LeafError, LeafResult};
use crate::pipeline::collaborators::{AreaModel, VideoScanner};
use crate::upload::{RemoteStore, UploadReceipt, UploadRequest};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// What the mock reports as the server checksum
#[derive(Debug, Clone, Default)]
pub enum ChecksumReply {
    /// SHA-256 of the received body
    #[default]
    Echo,
    Fixed(String),
    Omit,
}

type Observer = Box<dyn Fn(&UploadRequest) + Send + Sync>;

/// In-memory remote store
#[derive(Default)]
pub struct MockRemote {
    failures_left: Mutex<u32>,
    calls: Mutex<Vec<(String, ArtifactKind, Arc<[u8]>)>>,
    checksum: Mutex<ChecksumReply>,
    observer: Mutex<Option<Observer>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    resets: AtomicUsize,
    arrivals: AtomicUsize,
}

/// Blocks uploads until released
pub struct Gate(Arc<Semaphore>);

impl Gate {
    pub fn release(self) {
        self.0.close();
    }
}

impl MockRemote {
    /// Fail the first `n` uploads with a transport error
    pub fn failing(n: u32) -> Self {
        let remote = Self::default();
        *remote.failures_left.lock().unwrap() = n;
        remote
    }

    pub fn reply_checksum(&self, reply: ChecksumReply) {
        *self.checksum.lock().unwrap() = reply;
    }

    /// Run `f` at the start of every upload attempt
    pub fn observe(&self, f: impl Fn(&UploadRequest) + Send + Sync + 'static) {
        *self.observer.lock().unwrap() = Some(Box::new(f));
    }

    /// Hold every upload until the returned gate is released
    pub fn hold(&self) -> Gate {
        let semaphore = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(semaphore.clone());
        Gate(semaphore)
    }

    /// Every upload attempt seen, in order
    pub fn calls(&self) -> Vec<(String, ArtifactKind)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(e, k, _)| (e.clone(), *k))
            .collect()
    }

    /// Body of the latest upload of one artifact
    pub fn last_body(&self, entry_id: &str, kind: ArtifactKind) -> Option<Arc<[u8]>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(e, k, _)| e == entry_id && *k == kind)
            .map(|(_, _, body)| body.clone())
    }

    /// Upload attempts that have started, including those held at the gate
    pub fn arrivals(&self) -> usize {
        self.arrivals.load(Ordering::SeqCst)
    }

    pub fn uploaded(&self, entry_id: &str, kind: ArtifactKind) -> bool {
        self.calls()
            .iter()
            .any(|(e, k)| e == entry_id && *k == kind)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn upload(&self, request: &UploadRequest) -> LeafResult<UploadReceipt> {
        self.arrivals.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _ = gate.acquire().await;
        }
        if let Some(observer) = self.observer.lock().unwrap().as_ref() {
            observer(request);
        }
        self.calls
            .lock()
            .unwrap()
            .push((request.entry_id.clone(), request.kind, request.body.clone()));

        {
            let mut failures = self.failures_left.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(LeafError::Transport("connection refused".into()));
            }
        }

        let checksum = match self.checksum.lock().unwrap().clone() {
            ChecksumReply::Echo => Some(hex::encode(Sha256::digest(&request.body))),
            ChecksumReply::Fixed(value) => Some(value),
            ChecksumReply::Omit => None,
        };
        Ok(UploadReceipt { checksum })
    }

    async fn reset(&self) -> LeafResult<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Model returning a fixed area, or failing
pub struct FixedModel(pub Option<f64>);

impl AreaModel for FixedModel {
    fn predict(&self, _leaf_number: u32, _leaf_widths: &[f64]) -> LeafResult<f64> {
        self.0
            .ok_or_else(|| LeafError::Internal("model weights missing".into()))
    }
}

/// Scanner returning a fixed area, or failing
pub struct FixedScanner(pub Option<f64>);

impl VideoScanner for FixedScanner {
    fn scan(&self, _video: &Path, _out: &Path, _length: f64) -> LeafResult<f64> {
        self.0
            .ok_or_else(|| LeafError::Internal("no leaf detected".into()))
    }
}
