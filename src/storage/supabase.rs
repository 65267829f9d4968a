//! Supabase Storage over its REST API.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{StorageBackend, StorageError};
use crate::migrate::{ListedEntry, ObjectSource};

const BACKEND: &str = "supabase";
const LIST_PAGE: usize = 100;

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub key: String,
    pub bucket: String,
}

#[derive(Debug, Clone)]
pub struct SupabaseStorage {
    http: Client,
    base: String,
    key: String,
    bucket: String,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    name: String,
    #[serde(default)]
    metadata: Option<Value>,
}

impl SupabaseStorage {
    pub fn new(config: SupabaseConfig) -> Result<Self, StorageError> {
        if config.url.trim().is_empty() || config.key.trim().is_empty() {
            return Err(StorageError::Config(
                "SUPABASE_URL and SUPABASE_KEY are required".into(),
            ));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| StorageError::backend(BACKEND, e))?;
        Ok(Self {
            http,
            base: format!("{}/storage/v1", config.url.trim_end_matches('/')),
            key: config.key,
            bucket: config.bucket,
        })
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.key).header("apikey", &self.key)
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/object/{}/{}", self.base, self.bucket, key.trim_start_matches('/'))
    }

    async fn list_page(
        &self,
        prefix: &str,
        search: &str,
        offset: usize,
    ) -> Result<Vec<ListEntry>, StorageError> {
        let url = format!("{}/object/list/{}", self.base, self.bucket);
        let body = json!({
            "prefix": prefix,
            "search": search,
            "limit": LIST_PAGE,
            "offset": offset,
            "sortBy": { "column": "name", "order": "asc" },
        });
        let resp = self
            .authed(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| StorageError::backend(BACKEND, e))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(StorageError::backend(
                BACKEND,
                format!("list {prefix} returned {status}: {text}"),
            ));
        }
        resp.json::<Vec<ListEntry>>()
            .await
            .map_err(|e| StorageError::backend(BACKEND, e))
    }
}

fn split_key(key: &str) -> (&str, &str) {
    match key.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", key),
    }
}

#[async_trait]
impl StorageBackend for SupabaseStorage {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let (dir, name) = split_key(key);
        let entries = self.list_page(dir, name, 0).await?;
        Ok(entries.iter().any(|e| e.name == name))
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<String, StorageError> {
        let resp = self
            .authed(self.http.post(self.object_url(key)))
            .header("content-type", content_type)
            .header("x-upsert", "true")
            .body(data)
            .send()
            .await
            .map_err(|e| StorageError::backend(BACKEND, e))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(StorageError::backend(
                BACKEND,
                format!("upload {key} returned {status}: {text}"),
            ));
        }
        debug!(key, "supabase upload ok");
        Ok(key.to_string())
    }

    async fn reference_for(&self, key: &str) -> Result<String, StorageError> {
        Ok(key.to_string())
    }
}

#[async_trait]
impl ObjectSource for SupabaseStorage {
    async fn list(&self, prefix: &str) -> Result<Vec<ListedEntry>, StorageError> {
        let mut out = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.list_page(prefix, "", offset).await?;
            let n = page.len();
            out.extend(page.into_iter().map(|e| ListedEntry {
                is_folder: e.metadata.as_ref().map(Value::is_null).unwrap_or(true),
                name: e.name,
            }));
            if n < LIST_PAGE {
                break;
            }
            offset += n;
        }
        Ok(out)
    }

    async fn download(&self, key: &str) -> Result<Bytes, StorageError> {
        let resp = self
            .authed(self.http.get(self.object_url(key)))
            .send()
            .await
            .map_err(|e| StorageError::backend(BACKEND, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(StorageError::backend(
                BACKEND,
                format!("download {key} returned {status}"),
            ));
        }
        resp.bytes()
            .await
            .map_err(|e| StorageError::backend(BACKEND, e))
    }
}
