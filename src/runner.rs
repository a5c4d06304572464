//! Query Runner (`spec.md` §4.4).
//!
//! Binds `:fromTime`/`:toTime` into the loader's decrypted SQL template
//! by textual substitution — the engine cannot know the dialect's bind
//! parameter syntax up front, so the values are rendered as properly
//! quoted timestamp literals rather than passed as driver parameters.
//! The only user input is the template itself, supplied by an
//! already-authenticated operator; the substituted values are
//! engine-computed instants, never attacker-controlled strings.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use sqlx::any::AnyPool;

use crate::crypto::EncryptionKey;
use crate::domain::{DbType, Loader, Window};
use crate::dynrow::row_to_json_object;
use crate::error::{EngineError, EngineResult};

/// A fully materialized result set. Rows are collected before the
/// connection returns to the pool (`spec.md` §4.4: row counts are
/// bounded by business rules on the template, so streaming into the
/// sink isn't required).
pub struct QueryResult {
    pub rows: Vec<serde_json::Value>,
}

pub async fn run(
    pool: &AnyPool,
    db_type: DbType,
    loader: &Loader,
    window: Window,
    encryption_key: &EncryptionKey,
) -> EngineResult<QueryResult> {
    let template = encryption_key.decrypt(&loader.loader_sql_ciphertext, &loader.loader_sql_nonce)?;
    let (source_from, source_to) = window.source_local(loader.source_timezone_offset_hours);
    let bound_sql = bind_window(&template, db_type, source_from, source_to);

    let timeout = StdDuration::from_secs(loader.max_interval_seconds.max(1) as u64);

    let query = sqlx::query(&bound_sql);
    let rows = tokio::time::timeout(timeout, query.fetch_all(pool))
        .await
        .map_err(|_| EngineError::Timeout(format!("query for loader {} exceeded {:?}", loader.loader_code, timeout)))?
        .map_err(classify_sqlx_error)?;

    Ok(QueryResult {
        rows: rows.iter().map(row_to_json_object).collect(),
    })
}

/// Textually substitute `:fromTime`/`:toTime` with dialect-appropriate
/// quoted timestamp literals. Never reached with `DbType::Unknown` in
/// practice — the Source Registry refuses to hand out a connection for
/// an unrecognized dialect before the Query Runner is ever called — but
/// the plain-quoted form is kept as a harmless fallback.
fn bind_window(template: &str, db_type: DbType, from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    let (from_lit, to_lit) = match db_type {
        DbType::Mysql | DbType::Unknown => (
            format!("'{}'", from.format("%Y-%m-%d %H:%M:%S%.6f")),
            format!("'{}'", to.format("%Y-%m-%d %H:%M:%S%.6f")),
        ),
        DbType::Postgresql => (
            format!("TIMESTAMP '{}'", from.format("%Y-%m-%d %H:%M:%S%.6f")),
            format!("TIMESTAMP '{}'", to.format("%Y-%m-%d %H:%M:%S%.6f")),
        ),
    };
    template.replace(":fromTime", &from_lit).replace(":toTime", &to_lit)
}

/// Classify a raw `sqlx::Error` into the engine's error taxonomy
/// (`spec.md` §7). `sqlx` doesn't expose a single portable "is this a
/// syntax error" signal across MySQL/Postgres drivers, so this keys off
/// the SQLSTATE class, which both dialects populate consistently.
fn classify_sqlx_error(err: sqlx::Error) -> EngineError {
    match &err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            // SQLSTATE class 42 (Postgres) / MySQL's own 1064-family syntax
            // errors both surface a code starting with "42".
            if code.starts_with("42") {
                EngineError::SqlSyntax(db_err.message().to_string())
            } else {
                EngineError::SourceUnavailable(db_err.message().to_string())
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => EngineError::SourceUnavailable(err.to_string()),
        other => EngineError::SourceUnavailable(other.to_string()),
    }
}
