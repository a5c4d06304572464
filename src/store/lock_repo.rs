//! `execution_lock` reads used by the Recovery Sweeper (`spec.md` §4.8).

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::domain::{ExecutionLock, LoadStatus};
use crate::error::EngineResult;

use super::Store;

impl Store {
    pub async fn list_locks(&self) -> EngineResult<Vec<ExecutionLock>> {
        let rows = sqlx::query(
            "SELECT loader_code, slot, holder_id, correlation_id, acquired_at, heartbeat_at FROM execution_lock",
        )
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ExecutionLock {
                    loader_code: row.try_get("loader_code")?,
                    slot: row.try_get("slot")?,
                    holder_id: row.try_get("holder_id")?,
                    correlation_id: row.try_get("correlation_id")?,
                    acquired_at: row.try_get("acquired_at")?,
                    heartbeat_at: row.try_get("heartbeat_at")?,
                })
            })
            .collect()
    }

    /// Delete a stale lock and, if the loader is still `RUNNING`, mark
    /// it `FAILED` with the given reason — both in one transaction
    /// (`spec.md` §4.8).
    pub async fn reap_stale_lock(
        &self,
        loader_code: &str,
        slot: i32,
        reason: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM execution_lock WHERE loader_code = $1 AND slot = $2")
            .bind(loader_code)
            .bind(slot)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE loader SET load_status = $1, failed_since = $2, failed_reason = $3
            WHERE loader_code = $4 AND load_status = $5
            "#,
        )
        .bind(LoadStatus::Failed.to_string())
        .bind(now)
        .bind(reason)
        .bind(loader_code)
        .bind(LoadStatus::Running.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Reset loaders stuck in `FAILED` past the recovery grace period
    /// back to `IDLE` (`spec.md` §4.8). Returns the codes that were
    /// reset, for activity-event emission.
    pub async fn recover_failed_loaders(&self, grace_cutoff: DateTime<Utc>) -> EngineResult<Vec<String>> {
        let rows = sqlx::query(
            r#"
            UPDATE loader SET load_status = $1, failed_since = NULL, failed_reason = NULL
            WHERE load_status = $2 AND failed_since IS NOT NULL AND failed_since < $3
            RETURNING loader_code
            "#,
        )
        .bind(LoadStatus::Idle.to_string())
        .bind(LoadStatus::Failed.to_string())
        .bind(grace_cutoff)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(|row| Ok(row.try_get("loader_code")?)).collect()
    }
}
