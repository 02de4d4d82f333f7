//! Remote artifact store client
//!
//! Protocol:
//!
//! | Request | Headers | Body | Response |
//! |---------|---------|------|----------|
//! | `POST /upload` | `X-Video-ID`, `X-Artifact`, `X-Ext` | raw bytes | `{"checksum": "<sha256 hex>"}` |
//! | `POST /reset` | | | ignored |

use crate::artifact::ArtifactKind;
use crate::error::{LeafError, LeafResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One artifact to transfer
///
/// The body is read once so that the bytes sent are exactly the bytes
/// that were hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub entry_id: String,
    pub kind: ArtifactKind,
    pub body: Arc<[u8]>,
}

/// What the remote store acknowledged
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UploadReceipt {
    /// Server-computed SHA-256 hex digest, if the server reports one
    #[serde(default)]
    pub checksum: Option<String>,
}

/// The authoritative remote store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Transfer one artifact
    async fn upload(&self, request: &UploadRequest) -> LeafResult<UploadReceipt>;

    /// Clear the remote store
    async fn reset(&self) -> LeafResult<()>;
}

/// HTTP client for the remote store
///
/// `ureq` is blocking, so every request runs on the blocking thread pool.
#[derive(Clone)]
pub struct HttpRemoteStore {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: config.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn upload(&self, request: &UploadRequest) -> LeafResult<UploadReceipt> {
        let agent = self.agent.clone();
        let url = self.endpoint("upload");
        let request = request.clone();

        tokio::task::spawn_blocking(move || {
            let mut response = agent
                .post(&url)
                .header("Content-Type", "application/octet-stream")
                .header("X-Video-ID", request.entry_id.as_str())
                .header("X-Artifact", request.kind.as_str())
                .header("X-Ext", request.kind.extension())
                .send(&request.body[..])
                .map_err(|e| LeafError::Transport(format!("POST {url}: {e}")))?;

            let body = response
                .body_mut()
                .read_to_string()
                .map_err(|e| LeafError::Transport(format!("reading response from {url}: {e}")))?;

            debug!(entry_id = %request.entry_id, kind = %request.kind, "Remote accepted upload");
            Ok(parse_receipt(&body))
        })
        .await
        .map_err(|e| LeafError::Internal(format!("upload task failed: {e}")))?
    }

    async fn reset(&self) -> LeafResult<()> {
        let agent = self.agent.clone();
        let url = self.endpoint("reset");

        tokio::task::spawn_blocking(move || {
            agent
                .post(&url)
                .send_empty()
                .map_err(|e| LeafError::Transport(format!("POST {url}: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| LeafError::Internal(format!("reset task failed: {e}")))?
    }
}

/// Response bodies that are not the expected JSON carry no checksum
fn parse_receipt(body: &str) -> UploadReceipt {
    if body.trim().is_empty() {
        return UploadReceipt::default();
    }
    serde_json::from_str(body).unwrap_or_else(|e| {
        warn!("Unexpected upload response body: {}", e);
        UploadReceipt::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_with_checksum() {
        let receipt = parse_receipt(r#"{"checksum": "abc123", "size": 10}"#);
        assert_eq!(receipt.checksum.as_deref(), Some("abc123"));
    }

    #[test]
    fn receipt_without_checksum() {
        assert_eq!(parse_receipt(""), UploadReceipt::default());
        assert_eq!(parse_receipt("{}"), UploadReceipt::default());
        assert_eq!(parse_receipt("OK"), UploadReceipt::default());
    }

    #[test]
    fn endpoints_ignore_trailing_slash() {
        let remote = HttpRemoteStore::new("http://store:8000/", Duration::from_secs(1));
        assert_eq!(remote.base_url(), "http://store:8000");
        assert_eq!(remote.endpoint("upload"), "http://store:8000/upload");
    }

    #[tokio::test]
    async fn unreachable_remote_is_transport_error() {
        // Port 9 (discard) on localhost is closed in test environments
        let remote = HttpRemoteStore::new("http://127.0.0.1:9", Duration::from_secs(2));
        let err = remote
            .upload(&UploadRequest {
                entry_id: "J1".into(),
                kind: ArtifactKind::Video,
                body: Arc::from(&b"video"[..]),
            })
            .await
            .unwrap_err();

        assert!(err.is_retryable(), "got {err:?}");
    }
}
