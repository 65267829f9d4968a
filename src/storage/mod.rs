//! Object storage behind one trait, with three adapters.
//!
//! Callers never talk to an adapter directly; they go through
//! [`uploader::MediaUploader`], which owns key derivation, the existence
//! short-circuit and the retry policy.

pub mod mega;
pub mod s3;
pub mod supabase;
pub mod uploader;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::{error, warn};

pub use uploader::MediaUploader;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{backend} backend error: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command `{program}` failed: {message}")]
    Command { program: String, message: String },
    #[error("storage configuration: {0}")]
    Config(String),
}

impl StorageError {
    pub fn backend(backend: &'static str, message: impl ToString) -> Self {
        Self::Backend {
            backend,
            message: message.to_string(),
        }
    }
}

/// Write-once object store addressed by [`StorageKey`] strings.
///
/// `put` must overwrite whatever sits at `key`, including the remains of a
/// failed earlier attempt.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    async fn put(&self, key: &str, data: Bytes, content_type: &str)
        -> Result<String, StorageError>;

    /// Reference handed back for an object already present at `key`.
    async fn reference_for(&self, key: &str) -> Result<String, StorageError>;

    async fn open_session(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn close_session(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// `{category}/{content_id}/{content_id}_{NN}{ext}` with a 1-based, two-digit index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new(category: &str, content_id: &str, index: usize, ext: &str) -> Self {
        let ext = normalize_ext(ext);
        Self(format!("{category}/{content_id}/{content_id}_{index:02}{ext}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_ext(ext: &str) -> String {
    let ext = ext.trim();
    if ext.is_empty() || ext.starts_with('.') {
        ext.to_ascii_lowercase()
    } else {
        format!(".{}", ext.to_ascii_lowercase())
    }
}

pub fn content_type_for(ext_or_key: &str) -> &'static str {
    let ext = ext_or_key
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// What gets uploaded. Paths and URLs are resolved to bytes by the uploader.
#[derive(Debug, Clone)]
pub enum MediaSource {
    LocalFile(PathBuf),
    RemoteUrl(String),
    Bytes { data: Bytes, ext: String },
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

/// `put` under a fixed-backoff retry. Exhaustion is logged and reported as `None`.
pub async fn put_with_retry(
    backend: &dyn StorageBackend,
    key: &str,
    data: Bytes,
    content_type: &str,
    policy: RetryPolicy,
) -> Option<String> {
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        match backend.put(key, data.clone(), content_type).await {
            Ok(reference) => return Some(reference),
            Err(e) if attempt < attempts => {
                warn!(backend = backend.name(), key, attempt, error = %e, "storage put failed; retrying");
                tokio::time::sleep(policy.backoff).await;
            }
            Err(e) => {
                error!(backend = backend.name(), key, attempt, error = %e, "storage put failed; giving up");
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn key_is_deterministic() {
        let key = StorageKey::new("comic", "X1", 3, ".jpg");
        assert_eq!(key.as_str(), "comic/X1/X1_03.jpg");
        assert_eq!(key, StorageKey::new("comic", "X1", 3, "jpg"));
        assert_eq!(StorageKey::new("c", "X1", 12, ".PDF").as_str(), "c/X1/X1_12.pdf");
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for(".jpeg"), "image/jpeg");
        assert_eq!(content_type_for("a/b/X1_01.png"), "image/png");
        assert_eq!(content_type_for("mp4"), "video/mp4");
        assert_eq!(content_type_for(".pdf"), "application/pdf");
        assert_eq!(content_type_for(".bin"), "application/octet-stream");
    }

    struct Flaky {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl StorageBackend for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }
        async fn exists(&self, _key: &str) -> Result<bool, StorageError> {
            Ok(false)
        }
        async fn put(&self, key: &str, _d: Bytes, _ct: &str) -> Result<String, StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(StorageError::backend("flaky", "transient"));
            }
            Ok(key.to_string())
        }
        async fn reference_for(&self, key: &str) -> Result<String, StorageError> {
            Ok(key.to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let backend = Flaky {
            failures_left: AtomicU32::new(2),
            calls: AtomicU32::new(0),
        };
        let out = put_with_retry(&backend, "k", Bytes::new(), "image/jpeg", RetryPolicy::default()).await;
        assert_eq!(out.as_deref(), Some("k"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_yields_none() {
        let backend = Flaky {
            failures_left: AtomicU32::new(10),
            calls: AtomicU32::new(0),
        };
        let out = put_with_retry(&backend, "k", Bytes::new(), "image/jpeg", RetryPolicy::default()).await;
        assert!(out.is_none());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }
}
