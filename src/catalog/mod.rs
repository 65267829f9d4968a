//! Catalog records and the single boundary where upstream payloads are parsed.
//!
//! The affiliate API returns deeply nested, loosely typed JSON. Everything the
//! pipeline needs is pulled out here once, into [`CatalogItem`], so malformed
//! payloads fail (or degrade to `None`) at one place instead of deep inside the
//! ingestion steps. The untouched payload is kept in [`CatalogItem::raw`].

pub mod client;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::normalization::{parse_review_average, parse_review_count};

pub use client::{AffiliateCatalogClient, CatalogApi, CatalogQuery};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog item is not a JSON object")]
    NotAnObject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Review {
    pub count: Option<i64>,
    pub average: Option<f64>,
}

/// A product record as returned by the catalog API. Immutable within a run.
#[derive(Debug, Clone)]
pub struct CatalogItem {
    /// Stable external identifier. Items without one are rejected by the pipeline.
    pub content_id: Option<String>,
    pub product_id: Option<String>,
    pub title: String,
    pub url: Option<String>,
    pub affiliate_url: Option<String>,
    pub volume: Option<String>,
    pub price: Option<String>,
    pub list_price: Option<String>,
    pub genres: Vec<Genre>,
    /// Large sample images, in catalog order.
    pub sample_image_urls: Vec<String>,
    pub sample_image_urls_small: Vec<String>,
    pub image_large_url: Option<String>,
    pub image_small_url: Option<String>,
    /// Highest-resolution trailer among the advertised `size_W_H` variants.
    pub sample_movie_url: Option<String>,
    /// Paginated preview viewer; presence triggers page capture.
    pub viewer_url: Option<String>,
    pub viewer_affiliate_url: Option<String>,
    pub review: Review,
    pub release_date: Option<String>,
    pub maker: Option<String>,
    pub series: Option<String>,
    pub actress: Option<Value>,
    pub director: Option<Value>,
    pub author: Option<Value>,
    pub category_name: Option<String>,
    pub campaign: Option<Value>,
    pub raw: Value,
}

impl CatalogItem {
    pub fn from_value(raw: Value) -> Result<Self, CatalogError> {
        if !raw.is_object() {
            return Err(CatalogError::NotAnObject);
        }
        let iteminfo = raw.get("iteminfo").unwrap_or(&Value::Null);
        let review = raw.get("review").unwrap_or(&Value::Null);

        Ok(Self {
            content_id: str_at(&raw, &["content_id"]),
            product_id: str_at(&raw, &["product_id"]),
            title: str_at(&raw, &["title"]).unwrap_or_default(),
            url: str_at(&raw, &["URL"]),
            affiliate_url: str_at(&raw, &["affiliateURL"]),
            volume: str_at(&raw, &["volume"]),
            price: str_at(&raw, &["prices", "price"]),
            list_price: str_at(&raw, &["prices", "list_price"]),
            genres: parse_genres(iteminfo.get("genre")),
            sample_image_urls: string_list(&raw, &["sampleImageURL", "sample_l", "image"]),
            sample_image_urls_small: string_list(&raw, &["sampleImageURL", "sample_s", "image"]),
            image_large_url: str_at(&raw, &["imageURL", "large"]),
            image_small_url: str_at(&raw, &["imageURL", "small"]),
            sample_movie_url: raw.get("sampleMovieURL").and_then(highest_resolution_movie),
            viewer_url: str_at(&raw, &["tachiyomi", "URL"]),
            viewer_affiliate_url: str_at(&raw, &["tachiyomi", "affiliateURL"]),
            review: Review {
                count: review.get("count").and_then(parse_review_count),
                average: review.get("average").and_then(parse_review_average),
            },
            release_date: str_at(&raw, &["date"]),
            maker: first_name(iteminfo, "maker").or_else(|| first_name(iteminfo, "manufacture")),
            series: first_name(iteminfo, "series"),
            actress: iteminfo.get("actress").cloned(),
            director: iteminfo.get("director").cloned(),
            author: iteminfo
                .get("author")
                .or_else(|| raw.get("author"))
                .cloned(),
            category_name: str_at(&raw, &["category_name"]),
            campaign: raw.get("campaign").cloned(),
            raw,
        })
    }

    /// The catalog only hands out items with a large sample list; this is the
    /// check applied before parsing.
    pub fn has_sample_list(raw: &Value) -> bool {
        raw.pointer("/sampleImageURL/sample_l/image")
            .map(Value::is_array)
            .unwrap_or(false)
    }
}

/// Pick the largest `size_W_H` variant by advertised area.
pub fn highest_resolution_movie(movie_info: &Value) -> Option<String> {
    let obj = movie_info.as_object()?;
    let mut best: Option<(u64, &str)> = None;
    for (key, url) in obj {
        let Some(url) = url.as_str() else {
            continue;
        };
        let Some(area) = variant_area(key) else {
            continue;
        };
        if best.map(|(a, _)| area > a).unwrap_or(true) {
            best = Some((area, url));
        }
    }
    best.map(|(_, url)| url.to_string())
}

fn variant_area(key: &str) -> Option<u64> {
    let mut parts = key.strip_prefix("size_")?.split('_');
    let w: u64 = parts.next()?.parse().ok()?;
    let h: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    w.checked_mul(h)
}

fn str_at(root: &Value, path: &[&str]) -> Option<String> {
    let mut cur = root;
    for key in path {
        cur = cur.get(key)?;
    }
    match cur {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_list(root: &Value, path: &[&str]) -> Vec<String> {
    let mut cur = root;
    for key in path {
        match cur.get(key) {
            Some(v) => cur = v,
            None => return Vec::new(),
        }
    }
    cur.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn first_name(iteminfo: &Value, key: &str) -> Option<String> {
    iteminfo
        .get(key)?
        .as_array()?
        .first()
        .and_then(|entry| str_at(entry, &["name"]))
}

fn parse_genres(raw: Option<&Value>) -> Vec<Genre> {
    let Some(entries) = raw.and_then(Value::as_array) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|g| {
            let id = match g.get("id")? {
                Value::Number(n) => n.as_i64()?,
                Value::String(s) => s.trim().parse().ok()?,
                _ => return None,
            };
            let name = str_at(g, &["name"])?;
            Some(Genre { id, name })
        })
        .collect()
}
