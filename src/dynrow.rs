//! Dynamic column decoding for `sqlx::any` rows.
//!
//! The Query Runner and Privilege Inspector both read rows whose schema
//! isn't known at compile time — the Runner because `loaderSql` is an
//! operator-supplied template against an arbitrary source table, the
//! Inspector because `SHOW GRANTS`/catalog views differ in shape
//! between dialects. Both funnel through the same best-effort typed
//! decode so there is exactly one place that knows how to turn an
//! `AnyRow` column into something the rest of the engine can use.

use sqlx::any::AnyRow;
use sqlx::{Column, Row, ValueRef};

/// Decode column `idx` of `row` into a JSON value, trying progressively
/// looser types until one decodes.
pub fn column_to_json(row: &AnyRow, idx: usize) -> serde_json::Value {
    let raw = match row.try_get_raw(idx) {
        Ok(raw) => raw,
        Err(_) => return serde_json::Value::Null,
    };
    if raw.is_null() {
        return serde_json::Value::Null;
    }

    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return serde_json::Value::from(v);
    }
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        if let Some(n) = serde_json::Number::from_f64(v) {
            return serde_json::Value::Number(n);
        }
    }
    if let Ok(v) = row.try_get::<bool, _>(idx) {
        return serde_json::Value::Bool(v);
    }
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return serde_json::Value::String(v);
    }
    if let Ok(v) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx) {
        return serde_json::Value::String(v.to_rfc3339());
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(idx) {
        return serde_json::Value::String(String::from_utf8_lossy(&v).into_owned());
    }

    serde_json::Value::Null
}

/// Decode column `idx` as a plain string, for dialect-inspection
/// queries (`SHOW GRANTS`, `SHOW VARIABLES`) where the column is
/// textual or a small integer flag.
pub fn column_to_text(row: &AnyRow, idx: usize) -> Option<String> {
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return Some(v);
    }
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Some(v.to_string());
    }
    if let Ok(v) = row.try_get::<bool, _>(idx) {
        return Some(if v { "1".to_string() } else { "0".to_string() });
    }
    None
}

/// Column names in declaration order, for building a JSON object out
/// of a row (the Query Runner's materialized result).
pub fn column_names(row: &AnyRow) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// Convert a full row into a JSON object keyed by column name, for the
/// Query Runner's materialized result set.
pub fn row_to_json_object(row: &AnyRow) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (idx, name) in column_names(row).into_iter().enumerate() {
        map.insert(name, column_to_json(row, idx));
    }
    serde_json::Value::Object(map)
}
