//! Collapsing "fetched but empty" values into a single absent representation
//! before persistence.

use serde_json::Value;

use crate::catalog::Genre;

/// `None`, `null`, `[]`, `{}` and `""` (after trimming) all become `None`.
pub fn normalize_value(value: Option<Value>) -> Option<Value> {
    match value? {
        Value::Null => None,
        Value::Array(items) if items.is_empty() => None,
        Value::Object(map) if map.is_empty() => None,
        Value::String(s) if s.trim().is_empty() => None,
        other => Some(other),
    }
}

/// Empty lists persist as absent rather than as `{}`.
pub fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// Blank strings persist as absent.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Split genres into parallel name and id arrays, order preserved.
pub fn flatten_genres(genres: &[Genre]) -> (Vec<String>, Vec<i64>) {
    genres
        .iter()
        .map(|g| (g.name.clone(), g.id))
        .unzip()
}
