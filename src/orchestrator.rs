//! Sequential sweep over the configured catalog targets.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};

use crate::capture::trailer::is_direct_mp4;
use crate::capture::BrowserMedia;
use crate::catalog::{CatalogApi, CatalogItem, CatalogQuery};
use crate::ingest::{CategoryContext, IngestOutcome, IngestionPipeline, ItemMedia};
use crate::media::MediaFetch;
use crate::storage::MediaSource;

/// One `(site, service, floor)` catalog slice, written `site:service[:floor]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub site: String,
    pub service: String,
    pub floor: Option<String>,
}

impl FromStr for Target {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').map(str::trim).collect();
        match parts.as_slice() {
            [site, service] if !site.is_empty() && !service.is_empty() => Ok(Self {
                site: site.to_string(),
                service: service.to_string(),
                floor: None,
            }),
            [site, service, floor] if !site.is_empty() && !service.is_empty() => Ok(Self {
                site: site.to_string(),
                service: service.to_string(),
                floor: (!floor.is_empty()).then(|| floor.to_string()),
            }),
            _ => bail!("invalid target {s:?}; expected site:service[:floor]"),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.floor {
            Some(floor) => write!(f, "{}:{}:{}", self.site, self.service, floor),
            None => write!(f, "{}:{}", self.site, self.service),
        }
    }
}

pub fn parse_targets(raw: &str) -> Result<Vec<Target>> {
    let targets = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Target::from_str)
        .collect::<Result<Vec<_>>>()?;
    if targets.is_empty() {
        bail!("no targets configured");
    }
    Ok(targets)
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub hits: u32,
    pub top_k: usize,
    pub sort: String,
    pub min_sample_count: u32,
    pub capture: bool,
    pub trailers: bool,
    pub work_root: PathBuf,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            hits: 10,
            top_k: 10,
            sort: "rank".to_string(),
            min_sample_count: 10,
            capture: true,
            trailers: false,
            work_root: std::env::temp_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetReport {
    pub target: String,
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl TargetReport {
    fn tally(&mut self, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Inserted { .. } => self.inserted += 1,
            IngestOutcome::Duplicate => self.duplicates += 1,
            IngestOutcome::Rejected => self.rejected += 1,
            IngestOutcome::InsertFailed | IngestOutcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub targets: Vec<TargetReport>,
    pub failed_targets: Vec<String>,
}

impl RunReport {
    /// 0 when every target completed, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.failed_targets.is_empty() {
            0
        } else {
            1
        }
    }
}

pub struct BatchOrchestrator {
    catalog: Arc<dyn CatalogApi>,
    pipeline: IngestionPipeline,
    browser: Option<Arc<dyn BrowserMedia>>,
    fetcher: Arc<dyn MediaFetch>,
    settings: RunSettings,
}

impl BatchOrchestrator {
    pub fn new(
        catalog: Arc<dyn CatalogApi>,
        pipeline: IngestionPipeline,
        browser: Option<Arc<dyn BrowserMedia>>,
        fetcher: Arc<dyn MediaFetch>,
        settings: RunSettings,
    ) -> Self {
        Self {
            catalog,
            pipeline,
            browser,
            fetcher,
            settings,
        }
    }

    pub async fn run(&self, targets: &[Target]) -> RunReport {
        let mut report = RunReport::default();
        for target in targets {
            info!(target = %target, "target start");
            match self.run_target(target).await {
                Ok(t) => {
                    info!(
                        target = %target,
                        fetched = t.fetched,
                        inserted = t.inserted,
                        duplicates = t.duplicates,
                        rejected = t.rejected,
                        failed = t.failed,
                        "target done"
                    );
                    report.targets.push(t);
                }
                Err(e) => {
                    error!(target = %target, error = ?e, "target failed");
                    report.failed_targets.push(target.to_string());
                }
            }
        }
        report
    }

    async fn run_target(&self, target: &Target) -> Result<TargetReport> {
        let query = CatalogQuery {
            site: target.site.clone(),
            service: target.service.clone(),
            floor: target.floor.clone(),
            hits: self.settings.hits,
            offset: 1,
            sort: self.settings.sort.clone(),
            keyword: None,
            min_sample_count: self.settings.min_sample_count,
        };
        let items = self
            .catalog
            .fetch_items(&query)
            .await
            .with_context(|| format!("fetching catalog for {target}"))?;

        let ctx = CategoryContext::new(&target.site, &target.service, target.floor.as_deref());
        let mut report = TargetReport {
            target: target.to_string(),
            fetched: items.len(),
            ..Default::default()
        };
        for item in items.iter().take(self.settings.top_k) {
            let outcome = self.process_item(item, &ctx).await?;
            report.tally(&outcome);
        }
        Ok(report)
    }

    async fn process_item(&self, item: &CatalogItem, ctx: &CategoryContext) -> Result<IngestOutcome> {
        // Duplicates and id-less items are settled before any media work.
        if let Some(outcome) = self.pipeline.precheck(item).await {
            return Ok(outcome);
        }
        let label = item.content_id.clone().unwrap_or_default();

        let work = tempfile::Builder::new()
            .prefix("harvest-")
            .tempdir_in(&self.settings.work_root)
            .with_context(|| format!("creating work dir in {}", self.settings.work_root.display()))?;

        let mut media = ItemMedia::default();
        if self.settings.capture {
            if let (Some(browser), Some(viewer_url)) = (&self.browser, &item.viewer_url) {
                let outcome = browser.capture_viewer(&label, viewer_url, work.path()).await;
                media.auxiliary.extend(
                    outcome
                        .pages
                        .into_iter()
                        .map(|p| MediaSource::LocalFile(p.path)),
                );
                media.document = outcome.document.map(MediaSource::LocalFile);
            }
        }
        if self.settings.trailers {
            if let Some(movie) = &item.sample_movie_url {
                if let Some(path) = self.fetch_trailer(&label, movie, work.path()).await {
                    media.auxiliary.push(MediaSource::LocalFile(path));
                }
            }
        }

        let outcome = self.pipeline.ingest_checked(item, &media, ctx).await;
        if let Err(e) = work.close() {
            warn!(content_id = %label, error = %e, "work dir cleanup failed");
        }
        Ok(outcome)
    }

    async fn fetch_trailer(&self, label: &str, page_url: &str, dir: &Path) -> Option<PathBuf> {
        let mp4 = if is_direct_mp4(page_url) {
            page_url.to_string()
        } else if let Some(browser) = &self.browser {
            browser.resolve_trailer(page_url).await?
        } else {
            warn!(content_id = label, page_url, "trailer needs a browser; skipping");
            return None;
        };
        let dest = dir.join(format!("{label}_trailer.mp4"));
        match self.fetcher.download_to(&mp4, Some(page_url), &dest).await {
            Ok(bytes) => {
                info!(content_id = label, bytes, "trailer downloaded");
                Some(dest)
            }
            Err(e) => {
                warn!(content_id = label, url = %mp4, error = %e, "trailer download failed");
                None
            }
        }
    }
}
