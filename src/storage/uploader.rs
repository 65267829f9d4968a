use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{error, info, warn};

use super::{content_type_for, put_with_retry, MediaSource, RetryPolicy, StorageBackend, StorageKey};
use crate::media::MediaFetch;

const URL_DEFAULT_EXT: &str = ".jpg";

/// Shared upload entry point: key derivation, existence short-circuit, retries.
#[derive(Clone)]
pub struct MediaUploader {
    backend: Arc<dyn StorageBackend>,
    fetcher: Arc<dyn MediaFetch>,
    policy: RetryPolicy,
}

impl MediaUploader {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        fetcher: Arc<dyn MediaFetch>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            fetcher,
            policy,
        }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Upload one media item at sequence `index`. `None` means the item could
    /// not be stored; the caller excludes it from the record.
    pub async fn upload(
        &self,
        source: &MediaSource,
        category: &str,
        content_id: &str,
        index: usize,
    ) -> Option<String> {
        let ext = extension_of(source);
        let key = StorageKey::new(category, content_id, index, &ext);
        let backend = self.backend.as_ref();

        match backend.exists(key.as_str()).await {
            Ok(true) => {
                info!(backend = backend.name(), key = %key, "object already stored; skipping upload");
                return match backend.reference_for(key.as_str()).await {
                    Ok(reference) => Some(reference),
                    Err(e) => {
                        error!(key = %key, error = %e, "reference lookup failed");
                        None
                    }
                };
            }
            Ok(false) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "existence check failed; uploading anyway");
            }
        }

        let data = match self.resolve(source).await {
            Ok(data) => data,
            Err(e) => {
                error!(key = %key, error = %e, "could not read media source");
                return None;
            }
        };

        let reference = put_with_retry(
            backend,
            key.as_str(),
            data,
            content_type_for(&ext),
            self.policy,
        )
        .await?;
        info!(backend = backend.name(), key = %key, "uploaded");
        Some(reference)
    }

    async fn resolve(&self, source: &MediaSource) -> anyhow::Result<Bytes> {
        match source {
            MediaSource::LocalFile(path) => {
                let data = tokio::fs::read(path).await?;
                Ok(Bytes::from(data))
            }
            MediaSource::RemoteUrl(url) => self.fetcher.fetch_bytes(url, None).await,
            MediaSource::Bytes { data, .. } => Ok(data.clone()),
        }
    }
}

/// Extension with a leading dot. Remote URLs without a recognised media
/// extension are treated as JPEG sample images.
pub fn extension_of(source: &MediaSource) -> String {
    match source {
        MediaSource::LocalFile(path) => ext_of_path(path).unwrap_or_default(),
        MediaSource::RemoteUrl(url) => {
            let path = url::Url::parse(url)
                .map(|u| u.path().to_string())
                .unwrap_or_else(|_| url.clone());
            ext_of_path(Path::new(&path))
                .filter(|ext| content_type_for(ext) != "application/octet-stream")
                .unwrap_or_else(|| URL_DEFAULT_EXT.to_string())
        }
        MediaSource::Bytes { ext, .. } => {
            if ext.starts_with('.') || ext.is_empty() {
                ext.clone()
            } else {
                format!(".{ext}")
            }
        }
    }
}

fn ext_of_path(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
}
