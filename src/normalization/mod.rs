pub mod fields;
pub mod price;
pub mod rating;

pub use fields::{flatten_genres, non_blank, non_empty, normalize_value};
pub use price::parse_price;
pub use rating::{parse_review_average, parse_review_count};
