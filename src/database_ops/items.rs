//! The items table: existence check and single-row insert.

use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, instrument};

use super::db::Db;
use crate::ingest::IngestedRecord;

pub const DEFAULT_ITEMS_TABLE: &str = "trn_dmm_items";

const COLUMNS: &[&str] = &[
    "content_id",
    "product_id",
    "site",
    "service",
    "floor",
    "title",
    "volume",
    "review_count",
    "review_average",
    "item_url",
    "affiliate_url",
    "image_large_url",
    "image_small_url",
    "sample_images",
    "sample_images_s",
    "sample_movie_url",
    "preview_pdf",
    "price",
    "list_price",
    "release_date",
    "genres",
    "genre_ids",
    "series",
    "maker",
    "campaign",
    "actress",
    "director",
    "author",
    "category_name",
    "tachiyomi_url",
    "tachiyomi_affiliate_url",
    "auto_comment",
    "auto_summary",
    "auto_point",
    "raw_json",
];

#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn exists_by_content_id(&self, content_id: &str) -> Result<bool>;
    async fn insert(&self, record: &IngestedRecord) -> Result<()>;
}

fn identifier() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
            .expect("static identifier pattern")
    })
}

pub struct PgItemStore {
    db: Db,
    table: String,
    insert_sql: String,
}

impl PgItemStore {
    pub fn new(db: Db, table: &str) -> Result<Self> {
        if !identifier().is_match(table) {
            bail!("invalid items table name {table:?}");
        }
        Ok(Self {
            db,
            table: table.to_string(),
            insert_sql: insert_statement(table),
        })
    }
}

fn insert_statement(table: &str) -> String {
    let placeholders: Vec<String> = (1..=COLUMNS.len()).map(|i| format!("${i}")).collect();
    format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        COLUMNS.join(", "),
        placeholders.join(", ")
    )
}

#[async_trait]
impl ItemStore for PgItemStore {
    #[instrument(skip(self))]
    async fn exists_by_content_id(&self, content_id: &str) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE content_id = $1)",
            self.table
        );
        let found: bool = sqlx::query_scalar(&sql)
            .bind(content_id)
            .fetch_one(&self.db.pool)
            .await
            .context("items existence check")?;
        Ok(found)
    }

    #[instrument(skip(self, r), fields(content_id = %r.content_id))]
    async fn insert(&self, r: &IngestedRecord) -> Result<()> {
        let result = sqlx::query(&self.insert_sql)
            .bind(&r.content_id)
            .bind(&r.product_id)
            .bind(&r.site)
            .bind(&r.service)
            .bind(&r.floor)
            .bind(&r.title)
            .bind(&r.volume)
            .bind(r.review_count)
            .bind(r.review_average)
            .bind(&r.item_url)
            .bind(&r.affiliate_url)
            .bind(&r.image_large_url)
            .bind(&r.image_small_url)
            .bind(&r.sample_images)
            .bind(&r.sample_images_s)
            .bind(&r.sample_movie_url)
            .bind(&r.preview_pdf)
            .bind(r.price)
            .bind(r.list_price)
            .bind(r.release_date)
            .bind(&r.genres)
            .bind(&r.genre_ids)
            .bind(&r.series)
            .bind(&r.maker)
            .bind(&r.campaign)
            .bind(&r.actress)
            .bind(&r.director)
            .bind(&r.author)
            .bind(&r.category_name)
            .bind(&r.tachiyomi_url)
            .bind(&r.tachiyomi_affiliate_url)
            .bind(&r.auto_comment)
            .bind(&r.auto_summary)
            .bind(&r.auto_point)
            .bind(&r.raw_json)
            .execute(&self.db.pool)
            .await
            .context("items insert")?;
        debug!(rows = result.rows_affected(), "items insert done");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_validated() {
        assert!(identifier().is_match("trn_dmm_items"));
        assert!(identifier().is_match("public.trn_dmm_items"));
        assert!(!identifier().is_match("items; drop table x"));
        assert!(!identifier().is_match("1items"));
    }

    #[test]
    fn insert_statement_binds_every_column() {
        let sql = insert_statement("trn_dmm_items");
        assert!(sql.starts_with("INSERT INTO trn_dmm_items (content_id, product_id,"));
        assert!(sql.ends_with(&format!("${})", COLUMNS.len())));
        assert_eq!(COLUMNS.len(), 35);
    }
}
