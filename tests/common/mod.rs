#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};

use catalog_harvest::capture::{BrowserMedia, CaptureOutcome, CapturedPage, Termination};
use catalog_harvest::catalog::{CatalogApi, CatalogItem, CatalogQuery};
use catalog_harvest::database_ops::ItemStore;
use catalog_harvest::enrichment::{ContentEnricher, GeneratedContent};
use catalog_harvest::ingest::{IngestedRecord, IngestionPipeline};
use catalog_harvest::media::MediaFetch;
use catalog_harvest::storage::{MediaUploader, RetryPolicy, StorageBackend, StorageError};

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 2,
        backoff: Duration::from_millis(1),
    }
}

pub fn item_json(content_id: &str, samples: usize) -> Value {
    let images: Vec<String> = (1..=samples)
        .map(|i| format!("https://pics.example.com/{content_id}/{content_id}jp-{i}.jpg"))
        .collect();
    json!({
        "content_id": content_id,
        "product_id": content_id,
        "title": format!("Title {content_id}"),
        "URL": format!("https://www.example.com/detail/{content_id}/"),
        "date": "2024-05-01 10:00:00",
        "prices": { "price": "1,100" },
        "sampleImageURL": { "sample_l": { "image": images } },
        "iteminfo": { "genre": [{ "id": 1, "name": "Drama" }] }
    })
}

pub fn item(content_id: &str, samples: usize) -> CatalogItem {
    CatalogItem::from_value(item_json(content_id, samples)).unwrap()
}

/// In-memory item table. Inserts for ids in `rejected_inserts` fail.
#[derive(Default)]
pub struct MemoryStore {
    pub rows: Mutex<Vec<IngestedRecord>>,
    pub rejected_inserts: HashSet<String>,
    pub exists_calls: AtomicUsize,
    pub insert_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn rejecting(ids: &[&str]) -> Self {
        Self {
            rejected_inserts: ids.iter().map(|id| id.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn content_ids(&self) -> Vec<String> {
        self.rows.lock().unwrap().iter().map(|r| r.content_id.clone()).collect()
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn exists_by_content_id(&self, content_id: &str) -> Result<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.lock().unwrap().iter().any(|r| r.content_id == content_id))
    }

    async fn insert(&self, record: &IngestedRecord) -> Result<()> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.rejected_inserts.contains(&record.content_id) {
            return Err(anyhow!("violates check constraint on {}", record.content_id));
        }
        self.rows.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// In-memory backend. Keys listed in `failing` reject every put.
#[derive(Default)]
pub struct MemoryStorage {
    pub objects: Mutex<HashMap<String, Bytes>>,
    pub failing: HashSet<String>,
    pub puts: AtomicUsize,
}

impl MemoryStorage {
    pub fn failing(keys: &[&str]) -> Self {
        Self {
            failing: keys.iter().map(|k| k.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> Result<String, StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(key) {
            return Err(StorageError::backend("memory", "rejected"));
        }
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(format!("mem://{key}"))
    }

    async fn reference_for(&self, key: &str) -> Result<String, StorageError> {
        Ok(format!("mem://{key}"))
    }
}

#[derive(Default)]
pub struct CountingEnricher {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ContentEnricher for CountingEnricher {
    async fn generate_content(&self, item: &CatalogItem) -> GeneratedContent {
        self.calls.fetch_add(1, Ordering::SeqCst);
        GeneratedContent {
            auto_comment: format!("comment for {}", item.title),
            ..Default::default()
        }
    }
}

/// Serves the URL itself as the body, so stored bytes identify their source.
#[derive(Default)]
pub struct FakeFetcher {
    pub fetched: Mutex<Vec<String>>,
}

#[async_trait]
impl MediaFetch for FakeFetcher {
    async fn fetch_bytes(&self, url: &str, _referer: Option<&str>) -> Result<Bytes> {
        self.fetched.lock().unwrap().push(url.to_string());
        Ok(Bytes::from(url.to_string()))
    }

    async fn download_to(&self, url: &str, _referer: Option<&str>, dest: &Path) -> Result<u64> {
        self.fetched.lock().unwrap().push(url.to_string());
        tokio::fs::write(dest, url.as_bytes()).await?;
        Ok(url.len() as u64)
    }
}

/// Catalog keyed by `site:service`; a missing key is a fetch error.
#[derive(Default)]
pub struct FakeCatalog {
    pub results: HashMap<String, Vec<CatalogItem>>,
    pub queries: Mutex<Vec<String>>,
}

#[async_trait]
impl CatalogApi for FakeCatalog {
    async fn fetch_items(&self, query: &CatalogQuery) -> Result<Vec<CatalogItem>> {
        let key = format!("{}:{}", query.site, query.service);
        self.queries.lock().unwrap().push(key.clone());
        self.results
            .get(&key)
            .cloned()
            .ok_or_else(|| anyhow!("catalog returned status 500 for {key}"))
    }
}

/// Writes `pages` small files into the work dir and reports them as captured.
pub struct FakeBrowser {
    pub pages: usize,
    pub captures: AtomicUsize,
}

#[async_trait]
impl BrowserMedia for FakeBrowser {
    async fn capture_viewer(&self, label: &str, _viewer_url: &str, out_dir: &Path) -> CaptureOutcome {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let mut outcome = CaptureOutcome::failed(Termination::Completed);
        for ordinal in 1..=self.pages {
            let path = out_dir.join(format!("page_{ordinal:03}.png"));
            std::fs::write(&path, format!("{label} page {ordinal}")).unwrap();
            outcome.pages.push(CapturedPage { ordinal, path });
        }
        outcome
    }

    async fn resolve_trailer(&self, _page_url: &str) -> Option<String> {
        None
    }
}

pub fn pipeline(
    store: Arc<MemoryStore>,
    storage: Arc<dyn StorageBackend>,
    fetcher: Arc<FakeFetcher>,
    enricher: Arc<CountingEnricher>,
) -> IngestionPipeline {
    let uploader = MediaUploader::new(storage, fetcher, fast_retry());
    IngestionPipeline::new(store, uploader, enricher)
}
