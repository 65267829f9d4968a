use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;

use super::CategoryContext;
use crate::catalog::CatalogItem;
use crate::enrichment::GeneratedContent;
use crate::normalization::{flatten_genres, non_blank, non_empty, normalize_value, parse_price};

/// One row of the items table. Built once, inserted once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestedRecord {
    pub content_id: String,
    pub product_id: Option<String>,
    pub site: String,
    pub service: String,
    pub floor: Option<String>,
    pub title: String,
    pub volume: Option<String>,
    pub review_count: Option<i64>,
    pub review_average: Option<f64>,
    pub item_url: Option<String>,
    pub affiliate_url: Option<String>,
    pub image_large_url: Option<String>,
    pub image_small_url: Option<String>,
    /// Storage references, auxiliary media first, then sample images.
    pub sample_images: Option<Vec<String>>,
    pub sample_images_s: Option<Vec<String>>,
    pub sample_movie_url: Option<String>,
    pub preview_pdf: Option<String>,
    pub price: Option<i64>,
    pub list_price: Option<i64>,
    pub release_date: Option<NaiveDateTime>,
    pub genres: Option<Vec<String>>,
    pub genre_ids: Option<Vec<i64>>,
    pub series: Option<String>,
    pub maker: Option<String>,
    pub campaign: Option<Value>,
    pub actress: Option<Value>,
    pub director: Option<Value>,
    pub author: Option<Value>,
    pub category_name: Option<String>,
    pub tachiyomi_url: Option<String>,
    pub tachiyomi_affiliate_url: Option<String>,
    pub auto_comment: String,
    pub auto_summary: String,
    pub auto_point: String,
    pub raw_json: Value,
}

impl IngestedRecord {
    pub fn build(
        content_id: &str,
        item: &CatalogItem,
        ctx: &CategoryContext,
        media_refs: Vec<String>,
        preview_pdf: Option<String>,
        content: GeneratedContent,
    ) -> Self {
        let (genre_names, genre_ids) = flatten_genres(&item.genres);
        Self {
            content_id: content_id.to_string(),
            product_id: item.product_id.clone(),
            site: ctx.site.clone(),
            service: ctx.service.clone(),
            floor: ctx.floor.clone(),
            title: item.title.clone(),
            volume: item.volume.clone(),
            review_count: item.review.count,
            review_average: item.review.average,
            item_url: item.url.clone(),
            affiliate_url: item.affiliate_url.clone(),
            image_large_url: item.image_large_url.clone(),
            image_small_url: item.image_small_url.clone(),
            sample_images: non_empty(media_refs),
            sample_images_s: non_empty(item.sample_image_urls_small.clone()),
            sample_movie_url: item.sample_movie_url.clone(),
            preview_pdf,
            price: parse_price(item.price.as_deref()),
            list_price: parse_price(item.list_price.as_deref()),
            release_date: item.release_date.as_deref().and_then(parse_release_date),
            genres: non_empty(genre_names),
            genre_ids: non_empty(genre_ids),
            series: non_blank(item.series.clone()),
            maker: non_blank(item.maker.clone()),
            campaign: normalize_value(item.campaign.clone()),
            actress: normalize_value(item.actress.clone()),
            director: normalize_value(item.director.clone()),
            author: normalize_value(item.author.clone()),
            category_name: non_blank(item.category_name.clone()),
            tachiyomi_url: item.viewer_url.clone(),
            tachiyomi_affiliate_url: item.viewer_affiliate_url.clone(),
            auto_comment: content.auto_comment,
            auto_summary: content.auto_summary,
            auto_point: content.auto_point,
            raw_json: item.raw.clone(),
        }
    }
}

/// Catalog dates look like `2024-05-01 10:00:00`; a bare date is midnight.
fn parse_release_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> CategoryContext {
        CategoryContext::new("FANZA", "doujin", Some("digital_doujin"))
    }

    #[test]
    fn empty_shapes_collapse_to_none() {
        let item = CatalogItem::from_value(json!({
            "content_id": "X1",
            "title": "T",
            "prices": { "price": "", "list_price": "1,320" },
            "iteminfo": { "genre": [], "actress": [], "director": "" }
        }))
        .unwrap();
        let rec = IngestedRecord::build("X1", &item, &ctx(), vec![], None, GeneratedContent::default());
        assert_eq!(rec.genres, None);
        assert_eq!(rec.genre_ids, None);
        assert_eq!(rec.actress, None);
        assert_eq!(rec.director, None);
        assert_eq!(rec.sample_images, None);
        assert_eq!(rec.price, None);
        assert_eq!(rec.list_price, Some(1320));
        assert_eq!(rec.auto_comment, "");
    }

    #[test]
    fn carries_refs_and_context() {
        let item = CatalogItem::from_value(json!({
            "content_id": "X1",
            "title": "T",
            "date": "2024-05-01 10:00:00",
            "iteminfo": { "genre": [{ "id": 5, "name": "A" }, { "id": 9, "name": "B" }] }
        }))
        .unwrap();
        let rec = IngestedRecord::build(
            "X1",
            &item,
            &ctx(),
            vec!["a".into(), "b".into()],
            Some("pdf".into()),
            GeneratedContent {
                auto_comment: "c".into(),
                ..Default::default()
            },
        );
        assert_eq!(rec.sample_images, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(rec.genres, Some(vec!["A".to_string(), "B".to_string()]));
        assert_eq!(rec.genre_ids, Some(vec![5, 9]));
        assert_eq!(rec.floor.as_deref(), Some("digital_doujin"));
        assert_eq!(rec.release_date.map(|d| d.to_string()).as_deref(), Some("2024-05-01 10:00:00"));
        assert_eq!(rec.raw_json["title"], "T");
    }

    #[test]
    fn release_date_formats() {
        assert!(parse_release_date("2024-05-01").is_some());
        assert!(parse_release_date("soon").is_none());
    }
}
