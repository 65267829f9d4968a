pub mod pipeline;
pub mod record;

use crate::storage::MediaSource;

pub use pipeline::{IngestOutcome, IngestionPipeline};
pub use record::IngestedRecord;

/// Where an item was found; the storage category is the floor when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryContext {
    pub site: String,
    pub service: String,
    pub floor: Option<String>,
}

impl CategoryContext {
    pub fn new(site: &str, service: &str, floor: Option<&str>) -> Self {
        Self {
            site: site.to_string(),
            service: service.to_string(),
            floor: floor.map(str::to_string),
        }
    }

    pub fn category(&self) -> &str {
        self.floor.as_deref().unwrap_or(&self.service)
    }
}

/// Media gathered for an item before ingestion: captured viewer pages and
/// the trailer, in upload order, plus the combined preview document.
#[derive(Debug, Clone, Default)]
pub struct ItemMedia {
    pub auxiliary: Vec<MediaSource>,
    pub document: Option<MediaSource>,
}
