//! `signal_record` writes used by the Ingestion Sink (`spec.md` §4.5).
//! The sink owns the schema contract with the central signal store; in
//! this engine that store is the same control-plane database, but
//! nothing outside `sink.rs` is expected to know that.

use crate::domain::SignalRecord;
use crate::error::EngineResult;

use super::Store;

impl Store {
    /// Delete any previously-ingested rows for this loader inside
    /// `[from, to]`, for `PurgeStrategy::PurgeAndReload`.
    pub async fn purge_window(&self, loader_code: &str, from: chrono::DateTime<chrono::Utc>, to: chrono::DateTime<chrono::Utc>) -> EngineResult<u64> {
        let result = sqlx::query(
            "DELETE FROM signal_record WHERE loader_code = $1 AND event_timestamp >= $2 AND event_timestamp <= $3",
        )
        .bind(loader_code)
        .bind(from)
        .bind(to)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Write a batch of rows transactionally — partial commits are not
    /// permitted (`spec.md` §4.5).
    pub async fn insert_signal_records(&self, records: &[SignalRecord]) -> EngineResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool().begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO signal_record (loader_code, event_timestamp, aggregation_period_seconds, payload)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&record.loader_code)
            .bind(record.event_timestamp)
            .bind(record.aggregation_period_seconds)
            .bind(&record.payload)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }
}
