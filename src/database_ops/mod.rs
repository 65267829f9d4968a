pub mod db;
pub mod items;

pub use db::Db;
pub use items::{ItemStore, PgItemStore, DEFAULT_ITEMS_TABLE};
