//! Marketing copy from a chat-completion model.
//!
//! Enrichment never fails the pipeline: every error path degrades to empty
//! strings and a log line.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::catalog::CatalogItem;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GeneratedContent {
    #[serde(default)]
    pub auto_comment: String,
    #[serde(default)]
    pub auto_summary: String,
    #[serde(default)]
    pub auto_point: String,
}

#[async_trait]
pub trait ContentEnricher: Send + Sync {
    async fn generate_content(&self, item: &CatalogItem) -> GeneratedContent;
}

/// Used when no API key is configured.
#[derive(Debug, Clone, Default)]
pub struct DisabledEnricher;

#[async_trait]
impl ContentEnricher for DisabledEnricher {
    async fn generate_content(&self, _item: &CatalogItem) -> GeneratedContent {
        GeneratedContent::default()
    }
}

pub struct OpenAiEnricher {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl OpenAiEnricher {
    pub fn new(api_key: String, model: Option<String>, base_url: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    async fn complete(&self, prompt: String) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".into(),
                content: prompt,
            }],
            temperature: 0.85,
        };
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("chat completion request")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("chat completion returned {}: {}", status, body);
        }
        let parsed: ChatResponse = resp.json().await.context("chat completion JSON")?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("chat completion returned no choices"))
    }
}

#[async_trait]
impl ContentEnricher for OpenAiEnricher {
    async fn generate_content(&self, item: &CatalogItem) -> GeneratedContent {
        info!(title = %item.title, model = %self.model, "generating copy");
        let raw = match self.complete(build_prompt(item)).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(title = %item.title, error = %e, "content generation failed");
                return GeneratedContent::default();
            }
        };
        debug!(response = %raw, "model response");
        match parse_generated(&raw) {
            Ok(content) => content,
            Err(e) => {
                error!(title = %item.title, error = %e, "model response was not the expected JSON");
                GeneratedContent::default()
            }
        }
    }
}

pub fn build_prompt(item: &CatalogItem) -> String {
    let genres: Vec<&str> = item.genres.iter().map(|g| g.name.as_str()).collect();
    let score = item
        .review
        .average
        .map(|a| format!("{a:.2}"))
        .unwrap_or_else(|| "不明".to_string());
    format!(
        "以下の作品情報をもとに、紹介文をJSONで生成してください。\n\
         キーは auto_comment（60〜100文字の感想）、auto_summary（50〜80文字の概要）、\
         auto_point（30〜50文字の購入したくなるポイント）の3つです。\n\
         例文をそのまま返さず、実際の日本語の文章で埋めてください。\n\n\
         - タイトル: {title}\n\
         - ジャンル: {genres}\n\
         - レビュー: {score}点（{count}件）\n\
         - サークル: {maker}\n\
         - 発売日: {date}\n\
         - シリーズ: {series}\n",
        title = item.title,
        genres = genres.join(", "),
        count = item.review.count.unwrap_or(0),
        maker = item.maker.as_deref().unwrap_or(""),
        date = item.release_date.as_deref().unwrap_or(""),
        series = item.series.as_deref().unwrap_or("該当なし"),
    )
}

/// Accept bare JSON or JSON inside a ``` fence (optionally tagged `json`).
pub fn parse_generated(raw: &str) -> Result<GeneratedContent> {
    let trimmed = raw.trim();
    let body = match trimmed.split("```").nth(1) {
        Some(block) => block.trim().strip_prefix("json").unwrap_or(block).trim(),
        None => trimmed,
    };
    serde_json::from_str(body).context("decode generated content")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_fenced_and_bare_json() {
        let fenced = "Here you go\n```json\n{\"auto_comment\": \"c\", \"auto_summary\": \"s\", \"auto_point\": \"p\"}\n```";
        let parsed = parse_generated(fenced).unwrap();
        assert_eq!(parsed.auto_comment, "c");
        assert_eq!(parsed.auto_point, "p");

        let bare = parse_generated("{\"auto_summary\": \"only\"}").unwrap();
        assert_eq!(bare.auto_summary, "only");
        assert_eq!(bare.auto_comment, "");

        assert!(parse_generated("not json").is_err());
    }

    #[test]
    fn prompt_carries_item_facts() {
        let item = CatalogItem::from_value(json!({
            "title": "Work",
            "review": { "count": 3, "average": "4.00" },
            "iteminfo": { "genre": [{ "id": 1, "name": "Fantasy" }] }
        }))
        .unwrap();
        let prompt = build_prompt(&item);
        assert!(prompt.contains("Work"));
        assert!(prompt.contains("Fantasy"));
        assert!(prompt.contains("4.00点（3件）"));
        assert!(prompt.contains("該当なし"));
    }

    #[tokio::test]
    async fn disabled_enricher_returns_empty_fields() {
        let item = CatalogItem::from_value(json!({ "title": "x" })).unwrap();
        assert_eq!(
            DisabledEnricher.generate_content(&item).await,
            GeneratedContent::default()
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_degrades_to_empty() {
        let enricher = OpenAiEnricher::new(
            "key".into(),
            None,
            Some("http://127.0.0.1:9".into()),
        )
        .unwrap();
        let item = CatalogItem::from_value(json!({ "title": "x" })).unwrap();
        assert_eq!(enricher.generate_content(&item).await, GeneratedContent::default());
    }
}
