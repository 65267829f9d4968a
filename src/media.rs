//! Remote media downloads, into memory or onto disk.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[async_trait]
pub trait MediaFetch: Send + Sync {
    async fn fetch_bytes(&self, url: &str, referer: Option<&str>) -> Result<Bytes>;

    /// Stream `url` into `dest`, returning the number of bytes written.
    /// A zero-byte body is an error.
    async fn download_to(&self, url: &str, referer: Option<&str>, dest: &Path) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub struct HttpMediaFetcher {
    http: Client,
    retries: u32,
}

impl HttpMediaFetcher {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
            )
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self { http, retries: 1 })
    }

    async fn get(&self, url: &str, referer: Option<&str>) -> Result<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            let mut req = self.http.get(url);
            if let Some(r) = referer {
                req = req.header(header::REFERER, r);
            }
            let outcome = match req.send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => anyhow::anyhow!("GET {} returned {}", url, resp.status()),
                Err(e) => anyhow::Error::new(e).context(format!("GET {url}")),
            };
            if attempt >= self.retries {
                return Err(outcome);
            }
            attempt += 1;
            warn!(url, attempt, error = %outcome, "media fetch failed; retrying");
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

#[async_trait]
impl MediaFetch for HttpMediaFetcher {
    async fn fetch_bytes(&self, url: &str, referer: Option<&str>) -> Result<Bytes> {
        let resp = self.get(url, referer).await?;
        let body = resp.bytes().await.context("reading media body")?;
        debug!(url, bytes = body.len(), "media fetched");
        Ok(body)
    }

    async fn download_to(&self, url: &str, referer: Option<&str>, dest: &Path) -> Result<u64> {
        let mut resp = self.get(url, referer).await?;
        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("create {}", dest.display()))?;
        let mut written = 0u64;
        while let Some(chunk) = resp.chunk().await.context("reading media stream")? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        if written == 0 {
            bail!("download of {} produced an empty file", url);
        }
        debug!(url, bytes = written, dest = %dest.display(), "media downloaded");
        Ok(written)
    }
}
