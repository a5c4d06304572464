//! `loader` table access: scheduling reads, lock-coupled state
//! transitions, and the admin-command writers (`spec.md` §4.6, §6).

use chrono::{DateTime, Utc};
use sqlx::{Row, Transaction};

use crate::domain::{ExecutionLock, LoadStatus, Loader, PurgeStrategy};
use crate::error::{EngineError, EngineResult};

use super::Store;

/// Result of [`Store::try_acquire`]: the three ways a lock-acquire
/// attempt can resolve (`spec.md` §4.6 steps 1–2).
pub enum LoaderAcquireOutcome {
    /// This replica now holds the lock and the loader is `RUNNING`.
    Acquired { loader: Loader, lock: ExecutionLock },
    /// Another replica already holds the `(loader_code, slot)` lock.
    SlotTaken,
    /// The lock was free but the loader was disabled, paused, or
    /// already failed/running by the time of the row-lock read; the
    /// just-inserted lock row was rolled back.
    NotSchedulable,
    /// The loader does not exist.
    NotFound,
}

fn row_to_loader(row: &sqlx::postgres::PgRow) -> EngineResult<Loader> {
    let purge_strategy: String = row.try_get("purge_strategy")?;
    let load_status: String = row.try_get("load_status")?;
    let backfill_purge_strategy_override: Option<String> = row.try_get("backfill_purge_strategy_override")?;

    Ok(Loader {
        loader_code: row.try_get("loader_code")?,
        loader_sql_ciphertext: row.try_get("loader_sql_ciphertext")?,
        loader_sql_nonce: row.try_get("loader_sql_nonce")?,
        source_code: row.try_get("source_code")?,
        min_interval_seconds: row.try_get("min_interval_seconds")?,
        max_interval_seconds: row.try_get("max_interval_seconds")?,
        max_query_period_seconds: row.try_get("max_query_period_seconds")?,
        max_parallel_executions: row.try_get("max_parallel_executions")?,
        source_timezone_offset_hours: row.try_get("source_timezone_offset_hours")?,
        aggregation_period_seconds: row.try_get("aggregation_period_seconds")?,
        purge_strategy: purge_strategy.parse().map_err(EngineError::InvalidConfig)?,
        enabled: row.try_get("enabled")?,
        load_status: load_status.parse().map_err(EngineError::InvalidConfig)?,
        last_load_timestamp: row.try_get("last_load_timestamp")?,
        max_ingested_timestamp: row.try_get("max_ingested_timestamp")?,
        last_execution_start: row.try_get("last_execution_start")?,
        last_execution_end: row.try_get("last_execution_end")?,
        failed_since: row.try_get("failed_since")?,
        failed_reason: row.try_get("failed_reason")?,
        consecutive_zero_record_runs: row.try_get("consecutive_zero_record_runs")?,
        consecutive_source_failures: row.try_get("consecutive_source_failures")?,
        consecutive_sink_failures: row.try_get("consecutive_sink_failures")?,
        force_next_run: row.try_get("force_next_run")?,
        backfill_target: row.try_get("backfill_target")?,
        backfill_purge_strategy_override: backfill_purge_strategy_override
            .map(|s| s.parse::<PurgeStrategy>())
            .transpose()
            .map_err(EngineError::InvalidConfig)?,
        backfill_max_query_period_override: row.try_get("backfill_max_query_period_override")?,
    })
}

const LOADER_COLUMNS: &str = r#"
    loader_code, loader_sql_ciphertext, loader_sql_nonce, source_code,
    min_interval_seconds, max_interval_seconds, max_query_period_seconds,
    max_parallel_executions, source_timezone_offset_hours, aggregation_period_seconds,
    purge_strategy, enabled, load_status, last_load_timestamp, max_ingested_timestamp,
    last_execution_start, last_execution_end, failed_since, failed_reason, consecutive_zero_record_runs,
    consecutive_source_failures, consecutive_sink_failures, force_next_run,
    backfill_target, backfill_purge_strategy_override, backfill_max_query_period_override
"#;

impl Store {
    pub async fn insert_loader(&self, loader: &Loader) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO loader
                (loader_code, loader_sql_ciphertext, loader_sql_nonce, source_code,
                 min_interval_seconds, max_interval_seconds, max_query_period_seconds,
                 max_parallel_executions, source_timezone_offset_hours, aggregation_period_seconds,
                 purge_strategy, enabled, load_status, last_load_timestamp, max_ingested_timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(&loader.loader_code)
        .bind(&loader.loader_sql_ciphertext)
        .bind(&loader.loader_sql_nonce)
        .bind(&loader.source_code)
        .bind(loader.min_interval_seconds)
        .bind(loader.max_interval_seconds)
        .bind(loader.max_query_period_seconds)
        .bind(loader.max_parallel_executions)
        .bind(loader.source_timezone_offset_hours)
        .bind(loader.aggregation_period_seconds)
        .bind(loader.purge_strategy.to_string())
        .bind(loader.enabled)
        .bind(loader.load_status.to_string())
        .bind(loader.last_load_timestamp)
        .bind(loader.max_ingested_timestamp)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_loader(&self, loader_code: &str) -> EngineResult<Option<Loader>> {
        let row = sqlx::query(&format!("SELECT {LOADER_COLUMNS} FROM loader WHERE loader_code = $1"))
            .bind(loader_code)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_loader).transpose()
    }

    /// Counts backing the `loader_running_count` / `loader_enabled_count`
    /// gauges (`spec.md` §6). Queried on demand when metrics are
    /// rendered, not maintained incrementally (§2.9: "not on the hot path").
    pub async fn gauge_counts(&self) -> EngineResult<(i64, i64)> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE load_status = 'running') AS running,
                COUNT(*) FILTER (WHERE enabled) AS enabled
            FROM loader
            "#,
        )
        .fetch_one(self.pool())
        .await?;
        Ok((row.try_get("running")?, row.try_get("enabled")?))
    }

    /// Enabled loaders in `IDLE`/`FAILED`, ordered per `spec.md` §4.7
    /// tie-breaking: failed-since-null first, then oldest watermark
    /// first, so the most-behind loader is dispatched first.
    pub async fn list_schedulable(&self) -> EngineResult<Vec<Loader>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {LOADER_COLUMNS} FROM loader
            WHERE enabled = TRUE AND load_status IN ('idle', 'failed')
            ORDER BY (failed_since IS NOT NULL), last_load_timestamp ASC NULLS FIRST
            "#
        ))
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_loader).collect()
    }

    /// Attempt to acquire the `(loader_code, slot)` execution lock and,
    /// in the same transaction, transition the loader to `RUNNING`
    /// (`spec.md` §4.6 steps 1–2, §5 locking discipline).
    pub async fn try_acquire(
        &self,
        loader_code: &str,
        slot: i32,
        holder_id: &str,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<LoaderAcquireOutcome> {
        let mut tx = self.pool().begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO execution_lock (loader_code, slot, holder_id, correlation_id, acquired_at, heartbeat_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (loader_code, slot) DO NOTHING
            "#,
        )
        .bind(loader_code)
        .bind(slot)
        .bind(holder_id)
        .bind(correlation_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(LoaderAcquireOutcome::SlotTaken);
        }

        let row = sqlx::query(&format!("SELECT {LOADER_COLUMNS} FROM loader WHERE loader_code = $1 FOR UPDATE"))
            .bind(loader_code)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(LoaderAcquireOutcome::NotFound);
        };
        let loader = row_to_loader(&row)?;

        if !loader.is_schedulable() {
            tx.rollback().await?;
            return Ok(LoaderAcquireOutcome::NotSchedulable);
        }

        sqlx::query("UPDATE loader SET load_status = $1 WHERE loader_code = $2")
            .bind(LoadStatus::Running.to_string())
            .bind(loader_code)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let lock = ExecutionLock::new(loader_code, slot, holder_id, correlation_id, now);
        Ok(LoaderAcquireOutcome::Acquired {
            loader: Loader {
                load_status: LoadStatus::Running,
                ..loader
            },
            lock,
        })
    }

    /// Record that planning confirmed the loader is due and execution
    /// is beginning now (`last_execution_start`, consumed by the
    /// `cadenceStart` due-check term), and clear `force_next_run`.
    pub async fn mark_execution_started(&self, loader_code: &str, now: DateTime<Utc>) -> EngineResult<()> {
        sqlx::query("UPDATE loader SET last_execution_start = $1, force_next_run = FALSE WHERE loader_code = $2")
            .bind(now)
            .bind(loader_code)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Seed the watermark for a never-before-run loader
    /// (`spec.md` §4.3 step 1). Persisted immediately, and only when
    /// still null, so a crash between seeding and the first execution
    /// never causes an unbounded replay.
    pub async fn seed_watermark_if_null(&self, loader_code: &str, seeded: DateTime<Utc>) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE loader SET
                last_load_timestamp = $1,
                max_ingested_timestamp = COALESCE(max_ingested_timestamp, $1)
            WHERE loader_code = $2 AND last_load_timestamp IS NULL
            "#,
        )
        .bind(seeded)
        .bind(loader_code)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Release without advancing anything — used when planning found
    /// nothing due, or the privilege gate / planning step aborted the
    /// run before any watermark-affecting work happened. Returns the
    /// loader to `IDLE`.
    pub async fn release_idle(&self, loader_code: &str, slot: i32) -> EngineResult<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("UPDATE loader SET load_status = $1 WHERE loader_code = $2")
            .bind(LoadStatus::Idle.to_string())
            .bind(loader_code)
            .execute(&mut *tx)
            .await?;
        delete_lock(&mut tx, loader_code, slot).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Commit a successful execution (`spec.md` §4.6 step 6/7):
    /// advance the watermark monotonically, update the zero-run
    /// counter, reset failure state, release the lock. Clears the
    /// backfill overrides once the backfill target has been reached.
    ///
    /// Conditioned on the `(loader_code, slot, correlation_id)` lock row
    /// still existing: if the Sweeper reaped it mid-run, the loader's
    /// `FAILED` transition is that sweeper's call to make, not this
    /// stale holder's — returns `Ok(false)` rather than resurrecting the
    /// loader to `IDLE` out from under it (`spec.md` §7 `STATE_LOST`).
    pub async fn commit_success(
        &self,
        loader_code: &str,
        slot: i32,
        correlation_id: &str,
        window_to: DateTime<Utc>,
        rows_ingested: usize,
        now: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let mut tx = self.pool().begin().await?;

        if !lock_owned_by(&mut tx, loader_code, slot, correlation_id).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE loader SET
                last_load_timestamp = $1,
                max_ingested_timestamp = CASE WHEN max_ingested_timestamp IS NULL OR max_ingested_timestamp < $1
                    THEN $1 ELSE max_ingested_timestamp END,
                last_execution_end = $2,
                consecutive_zero_record_runs = CASE WHEN $3 THEN consecutive_zero_record_runs + 1 ELSE 0 END,
                load_status = $4,
                failed_since = NULL,
                failed_reason = NULL,
                consecutive_source_failures = 0,
                consecutive_sink_failures = 0,
                backfill_target = CASE WHEN backfill_target IS NOT NULL AND $1 >= backfill_target THEN NULL ELSE backfill_target END,
                backfill_purge_strategy_override = CASE WHEN backfill_target IS NOT NULL AND $1 >= backfill_target THEN NULL ELSE backfill_purge_strategy_override END,
                backfill_max_query_period_override = CASE WHEN backfill_target IS NOT NULL AND $1 >= backfill_target THEN NULL ELSE backfill_max_query_period_override END
            WHERE loader_code = $5 AND (last_load_timestamp IS NULL OR last_load_timestamp <= $1)
            "#,
        )
        .bind(window_to)
        .bind(now)
        .bind(rows_ingested == 0)
        .bind(LoadStatus::Idle.to_string())
        .bind(loader_code)
        .execute(&mut *tx)
        .await?;

        delete_lock(&mut tx, loader_code, slot).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Commit a failed execution (`spec.md` §7): bump the appropriate
    /// consecutive-failure counter and, if it crossed the retry
    /// threshold (or the error kind is immediately fatal), transition
    /// to `FAILED` with the reason recorded. The watermark is never
    /// touched.
    ///
    /// Same lock-ownership guard as [`Store::commit_success`]: returns
    /// `Ok(false)` instead of writing if the lock this holder started
    /// with is already gone.
    pub async fn commit_failure(
        &self,
        loader_code: &str,
        slot: i32,
        correlation_id: &str,
        now: DateTime<Utc>,
        update: FailureUpdate,
    ) -> EngineResult<bool> {
        let mut tx = self.pool().begin().await?;

        if !lock_owned_by(&mut tx, loader_code, slot, correlation_id).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE loader SET
                last_execution_end = $1,
                load_status = $2,
                failed_since = $3,
                failed_reason = $4,
                consecutive_source_failures = $5,
                consecutive_sink_failures = $6
            WHERE loader_code = $7
            "#,
        )
        .bind(now)
        .bind(update.new_status.to_string())
        .bind(update.failed_since)
        .bind(update.failed_reason)
        .bind(update.consecutive_source_failures)
        .bind(update.consecutive_sink_failures)
        .bind(loader_code)
        .execute(&mut *tx)
        .await?;

        delete_lock(&mut tx, loader_code, slot).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// `STATE_LOST`: the Sweeper reaped this execution's lock mid-run.
    /// The work is discarded without advancing the watermark, and
    /// there is no lock left to release.
    pub async fn discard_state_lost(&self, loader_code: &str) -> EngineResult<()> {
        sqlx::query("UPDATE loader SET load_status = $1 WHERE loader_code = $2 AND load_status = $3")
            .bind(LoadStatus::Failed.to_string())
            .bind(loader_code)
            .bind(LoadStatus::Running.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn heartbeat(&self, loader_code: &str, slot: i32, now: DateTime<Utc>) -> EngineResult<()> {
        sqlx::query("UPDATE execution_lock SET heartbeat_at = $1 WHERE loader_code = $2 AND slot = $3")
            .bind(now)
            .bind(loader_code)
            .bind(slot)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    // -- admin commands (spec.md §6) -----------------------------------

    pub async fn pause(&self, loader_code: &str) -> EngineResult<()> {
        sqlx::query("UPDATE loader SET load_status = $1 WHERE loader_code = $2")
            .bind(LoadStatus::Paused.to_string())
            .bind(loader_code)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn resume(&self, loader_code: &str) -> EngineResult<()> {
        sqlx::query(
            "UPDATE loader SET load_status = $1, failed_since = NULL, failed_reason = NULL WHERE loader_code = $2",
        )
        .bind(LoadStatus::Idle.to_string())
        .bind(loader_code)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn force_next_run(&self, loader_code: &str) -> EngineResult<()> {
        sqlx::query("UPDATE loader SET force_next_run = TRUE WHERE loader_code = $1")
            .bind(loader_code)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Apply an administrative backfill request (`spec.md` §6):
    /// rewind the watermark and install the temporary overrides. Per
    /// `DESIGN.md`'s Open Question decision, this is accepted
    /// unconditionally — it is the *next execution's* Sink call that
    /// closes over `FAIL_ON_DUPLICATE` if the override doesn't clear
    /// it. Deliberately leaves `max_ingested_timestamp` untouched: that
    /// column is the Sink's only way to detect that the rewound window
    /// re-covers territory this loader already ingested.
    pub async fn apply_backfill(
        &self,
        loader_code: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        purge_strategy: PurgeStrategy,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE loader SET
                last_load_timestamp = $1,
                backfill_target = $2,
                backfill_purge_strategy_override = $3,
                backfill_max_query_period_override = LEAST(max_query_period_seconds, GREATEST(1, EXTRACT(EPOCH FROM ($2::timestamptz - $1::timestamptz))::BIGINT))
            WHERE loader_code = $4
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(purge_strategy.to_string())
        .bind(loader_code)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

/// Fields the Executor assembles when classifying a failed run,
/// handed to [`Store::commit_failure`].
pub struct FailureUpdate {
    pub new_status: LoadStatus,
    pub failed_since: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
    pub consecutive_source_failures: i32,
    pub consecutive_sink_failures: i32,
}

/// Whether the `(loader_code, slot)` lock is still held by
/// `correlation_id` — i.e. whether this execution's commit is still
/// the one entitled to mutate the loader row (`spec.md` §3: `RUNNING`
/// implies a live lock row).
async fn lock_owned_by(
    tx: &mut Transaction<'_, sqlx::Postgres>,
    loader_code: &str,
    slot: i32,
    correlation_id: &str,
) -> EngineResult<bool> {
    let row = sqlx::query("SELECT 1 FROM execution_lock WHERE loader_code = $1 AND slot = $2 AND correlation_id = $3")
        .bind(loader_code)
        .bind(slot)
        .bind(correlation_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.is_some())
}

async fn delete_lock(tx: &mut Transaction<'_, sqlx::Postgres>, loader_code: &str, slot: i32) -> EngineResult<()> {
    sqlx::query("DELETE FROM execution_lock WHERE loader_code = $1 AND slot = $2")
        .bind(loader_code)
        .bind(slot)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
