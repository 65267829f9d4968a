use std::sync::Arc;

use tracing::{error, info, warn};

use super::{CategoryContext, IngestedRecord, ItemMedia};
use crate::catalog::CatalogItem;
use crate::database_ops::ItemStore;
use crate::enrichment::ContentEnricher;
use crate::storage::{MediaSource, MediaUploader};

/// Index reserved for the combined preview document; media count from 1.
const DOCUMENT_INDEX: usize = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// No `content_id`; nothing written.
    Rejected,
    /// A row for this `content_id` already exists.
    Duplicate,
    Inserted { media: usize },
    InsertFailed,
    /// The item was abandoned before insert (store or storage session failure).
    Failed,
}

pub struct IngestionPipeline {
    store: Arc<dyn ItemStore>,
    uploader: MediaUploader,
    enricher: Arc<dyn ContentEnricher>,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn ItemStore>,
        uploader: MediaUploader,
        enricher: Arc<dyn ContentEnricher>,
    ) -> Self {
        Self {
            store,
            uploader,
            enricher,
        }
    }

    /// Settle items that need no work: missing id, already stored, or an
    /// unreachable store. `None` means the item should be ingested.
    pub async fn precheck(&self, item: &CatalogItem) -> Option<IngestOutcome> {
        let url = item.url.as_deref().unwrap_or_default();
        let Some(content_id) = item.content_id.as_deref() else {
            warn!(title = %item.title, url, "item has no content_id; skipping");
            return Some(IngestOutcome::Rejected);
        };
        match self.store.exists_by_content_id(content_id).await {
            Ok(true) => {
                info!(content_id, title = %item.title, url, "already registered; skipping");
                Some(IngestOutcome::Duplicate)
            }
            Ok(false) => None,
            Err(e) => {
                error!(content_id, error = %e, "existence check failed");
                Some(IngestOutcome::Failed)
            }
        }
    }

    pub async fn ingest(
        &self,
        item: &CatalogItem,
        media: &ItemMedia,
        ctx: &CategoryContext,
    ) -> IngestOutcome {
        if let Some(outcome) = self.precheck(item).await {
            return outcome;
        }
        self.ingest_checked(item, media, ctx).await
    }

    /// Everything after [`precheck`](Self::precheck), for callers that
    /// already ran it and got `None`.
    pub async fn ingest_checked(
        &self,
        item: &CatalogItem,
        media: &ItemMedia,
        ctx: &CategoryContext,
    ) -> IngestOutcome {
        let url = item.url.as_deref().unwrap_or_default();
        let Some(content_id) = item.content_id.as_deref() else {
            return IngestOutcome::Rejected;
        };
        info!(content_id, title = %item.title, "ingest start");

        let backend = self.uploader.backend().clone();
        let uploaded = match backend.open_session().await {
            Ok(()) => Some(self.upload_media(item, media, ctx, content_id).await),
            Err(e) => {
                error!(content_id, backend = backend.name(), error = %e, "storage session failed to open");
                None
            }
        };
        if let Err(e) = backend.close_session().await {
            warn!(content_id, backend = backend.name(), error = %e, "storage session failed to close");
        }
        let Some((refs, document)) = uploaded else {
            return IngestOutcome::Failed;
        };

        let content = self.enricher.generate_content(item).await;
        let media_count = refs.len();
        let record = IngestedRecord::build(content_id, item, ctx, refs, document, content);

        match self.store.insert(&record).await {
            Ok(()) => {
                info!(content_id, title = %item.title, url, media = media_count, "inserted");
                IngestOutcome::Inserted { media: media_count }
            }
            Err(e) => {
                error!(content_id, title = %item.title, url, error = %e, "insert failed");
                IngestOutcome::InsertFailed
            }
        }
    }

    /// Auxiliary media first, then sample images, one shared 1-based sequence.
    /// A failed upload still consumes its index so keys stay stable across runs.
    async fn upload_media(
        &self,
        item: &CatalogItem,
        media: &ItemMedia,
        ctx: &CategoryContext,
        content_id: &str,
    ) -> (Vec<String>, Option<String>) {
        let category = ctx.category();
        let samples = item
            .sample_image_urls
            .iter()
            .map(|u| MediaSource::RemoteUrl(u.clone()));
        let sources: Vec<MediaSource> = media.auxiliary.iter().cloned().chain(samples).collect();

        let mut refs = Vec::with_capacity(sources.len());
        for (i, source) in sources.iter().enumerate() {
            let index = i + 1;
            match self.uploader.upload(source, category, content_id, index).await {
                Some(reference) => refs.push(reference),
                None => error!(content_id, index, "media upload failed; excluded from record"),
            }
        }

        let document = match &media.document {
            Some(doc) => {
                let reference = self
                    .uploader
                    .upload(doc, category, content_id, DOCUMENT_INDEX)
                    .await;
                if reference.is_none() {
                    error!(content_id, "preview document upload failed");
                }
                reference
            }
            None => None,
        };
        (refs, document)
    }
}
