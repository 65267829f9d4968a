use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};

use super::CatalogItem;

pub const DEFAULT_API_URL: &str = "https://api.dmm.com/affiliate/v3/ItemList";

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

#[derive(Debug, Clone)]
pub struct CatalogQuery {
    pub site: String,
    pub service: String,
    pub floor: Option<String>,
    pub hits: u32,
    pub offset: u32,
    pub sort: String,
    pub keyword: Option<String>,
    /// Reported alongside the result count; the API does not filter on it.
    pub min_sample_count: u32,
}

impl CatalogQuery {
    pub fn new(site: &str, service: &str, floor: Option<&str>) -> Self {
        Self {
            site: site.to_string(),
            service: service.to_string(),
            floor: floor.map(str::to_string),
            hits: 10,
            offset: 1,
            sort: "rank".to_string(),
            keyword: None,
            min_sample_count: 10,
        }
    }
}

#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn fetch_items(&self, query: &CatalogQuery) -> Result<Vec<CatalogItem>>;
}

/// Affiliate ItemList client. Credentials travel as query parameters.
#[derive(Debug, Clone)]
pub struct AffiliateCatalogClient {
    base_url: String,
    http: Client,
    api_id: String,
    affiliate_id: String,
}

impl AffiliateCatalogClient {
    pub fn new(base_url: Option<&str>, api_id: String, affiliate_id: String) -> Result<Self> {
        let http = Client::builder()
            .user_agent("catalog-harvest/0.1")
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: base_url.unwrap_or(DEFAULT_API_URL).to_string(),
            http,
            api_id,
            affiliate_id,
        })
    }

    fn params(&self, query: &CatalogQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("api_id", self.api_id.clone()),
            ("affiliate_id", self.affiliate_id.clone()),
            ("site", query.site.clone()),
            ("service", query.service.clone()),
            ("hits", query.hits.to_string()),
            ("offset", query.offset.to_string()),
            ("sort", query.sort.clone()),
            ("output", "json".to_string()),
        ];
        if let Some(floor) = &query.floor {
            params.push(("floor", floor.clone()));
        }
        if let Some(keyword) = &query.keyword {
            params.push(("keyword", keyword.clone()));
        }
        params
    }
}

#[async_trait]
impl CatalogApi for AffiliateCatalogClient {
    async fn fetch_items(&self, query: &CatalogQuery) -> Result<Vec<CatalogItem>> {
        info!(
            site = %query.site,
            service = %query.service,
            floor = ?query.floor,
            hits = query.hits,
            keyword = ?query.keyword,
            "catalog: requesting item list"
        );
        let resp = self
            .http
            .get(&self.base_url)
            .query(&self.params(query))
            .send()
            .await
            .context("catalog request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "catalog API returned status {}: {}",
                status,
                truncate_for_log(body, 300)
            );
        }
        let body: Value = resp.json().await.context("catalog JSON decode")?;
        let items = parse_item_list(body)?;
        info!(
            min_sample_count = query.min_sample_count,
            count = items.len(),
            "catalog: items with a sample list"
        );
        Ok(items)
    }
}

/// Validate the API-level status and keep items that carry a large sample list.
pub fn parse_item_list(body: Value) -> Result<Vec<CatalogItem>> {
    let result = body
        .get("result")
        .ok_or_else(|| anyhow!("catalog response has no result object"))?;
    let status = match result.get("status") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    if status != Some(200) {
        let message = result
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("catalog API error (status {:?}): {}", status, message);
    }

    let raw_items = match result.get("items") {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    };
    let mut items = Vec::with_capacity(raw_items.len());
    for raw in raw_items {
        if !CatalogItem::has_sample_list(&raw) {
            continue;
        }
        match CatalogItem::from_value(raw) {
            Ok(item) => items.push(item),
            Err(e) => warn!(error = %e, "catalog: skipping malformed item"),
        }
    }
    Ok(items)
}
