pub mod capture;
pub mod catalog;
pub mod config;
pub mod database_ops;
pub mod enrichment;
pub mod ingest;
pub mod media;
pub mod migrate;
pub mod normalization;
pub mod orchestrator;
pub mod storage;
pub mod tracing;

pub mod util {
    pub mod env;
}

use std::sync::Arc;

use anyhow::{Context, Result};

use capture::{BrowserMedia, ChromeMedia, ViewerCaptureEngine};
use catalog::AffiliateCatalogClient;
use config::HarvestConfig;
use database_ops::{Db, PgItemStore};
use ingest::IngestionPipeline;
use media::HttpMediaFetcher;
use orchestrator::{BatchOrchestrator, RunReport};
use storage::MediaUploader;

/// Wire the production collaborators from `cfg` and sweep its targets.
pub async fn run_harvest(cfg: &HarvestConfig) -> Result<RunReport> {
    let db_url = util::env::db_url_prefer_session()?;
    let db = Db::connect(&db_url, 2).await.context("connecting to item store")?;
    let store = Arc::new(PgItemStore::new(db, &cfg.items_table)?);

    let backend = config::build_backend(cfg.storage)?;
    let fetcher = Arc::new(HttpMediaFetcher::new()?);
    let uploader = MediaUploader::new(backend, fetcher.clone(), cfg.retry);
    let pipeline = IngestionPipeline::new(store, uploader, cfg.enricher()?);

    let catalog = Arc::new(AffiliateCatalogClient::new(
        Some(&cfg.catalog_url),
        cfg.api_id.clone(),
        cfg.affiliate_id.clone(),
    )?);
    let browser: Option<Arc<dyn BrowserMedia>> = if cfg.run.capture || cfg.run.trailers {
        let engine = ViewerCaptureEngine::new(cfg.viewer_profile.clone(), cfg.capture.clone());
        Some(Arc::new(ChromeMedia::new(engine, cfg.chrome.clone())))
    } else {
        None
    };

    let orchestrator =
        BatchOrchestrator::new(catalog, pipeline, browser, fetcher, cfg.run.clone());
    Ok(orchestrator.run(&cfg.targets).await)
}
