//! **Staging store** — temporary remote copies of chunks for recognizers
//! that accept only references, not inline bytes.
//!
//! Artifacts live for one request: the Dispatcher stages each chunk before
//! recognition and deletes every artifact after the whole batch settles,
//! whether or not recognition succeeded.

use crate::error::{ScribeError, ScribeResult};
use async_trait::async_trait;

/// One temporary remote copy of a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    pub chunk_index: usize,
    pub remote_name: String,
    pub remote_uri: String,
}

/// Addressable object store used to stage chunks. `put` returns the URI the
/// recognizer should be handed; `delete` is best-effort cleanup.
#[async_trait]
pub trait StagingStore: Send + Sync {
    async fn put(&self, name: &str, bytes: &[u8]) -> ScribeResult<String>;
    async fn delete(&self, name: &str) -> ScribeResult<()>;
}

/// Google Cloud Storage staging backend over the JSON/media upload API.
/// Uses `STORAGE_API_TOKEN` (OAuth bearer) and `STORAGE_BUCKET` from the
/// environment.
#[derive(Debug, Clone)]
pub struct GcsStore {
    /// Base URL without trailing slash (override in tests).
    pub base_url: String,
    bucket: String,
    token: String,
    client: reqwest::Client,
}

impl GcsStore {
    pub const DEFAULT_BASE_URL: &'static str = "https://storage.googleapis.com";

    /// Build from environment for the given bucket: `STORAGE_API_TOKEN`
    /// (required), `STORAGE_API_URL` (optional override).
    pub fn from_env(bucket: &str) -> ScribeResult<Self> {
        let token = std::env::var("STORAGE_API_TOKEN")
            .map_err(|_| ScribeError::Config("STORAGE_API_TOKEN not set".to_string()))?;
        let base_url = std::env::var("STORAGE_API_URL")
            .unwrap_or_else(|_| Self::DEFAULT_BASE_URL.to_string());
        Self::new(base_url, bucket, token)
    }

    /// Create with explicit config.
    pub fn new(
        base_url: impl Into<String>,
        bucket: impl Into<String>,
        token: impl Into<String>,
    ) -> ScribeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            bucket: bucket.into(),
            token: token.into(),
            client,
        })
    }
}

#[async_trait]
impl StagingStore for GcsStore {
    async fn put(&self, name: &str, bytes: &[u8]) -> ScribeResult<String> {
        let url = format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.base_url.trim_end_matches('/'),
            self.bucket,
            name
        );
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Content-Type", "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ScribeError::Staging(format!(
                "GCS upload error {}: {}",
                status, body
            )));
        }
        Ok(format!("gs://{}/{}", self.bucket, name))
    }

    async fn delete(&self, name: &str) -> ScribeResult<()> {
        let url = format!(
            "{}/storage/v1/b/{}/o/{}",
            self.base_url.trim_end_matches('/'),
            self.bucket,
            name
        );
        let res = self
            .client
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(ScribeError::Staging(format!(
                "GCS delete error {} for object {}",
                res.status(),
                name
            )));
        }
        Ok(())
    }
}
