//! Control-plane persistence: the `loader`, `execution_lock`, and
//! `signal_record` tables the engine owns, plus read-only access to the
//! external `source_database` catalog (`spec.md` §6).
//!
//! Modeled the way the teacher's sibling control-plane readers do it
//! (see `examples/zed-industries-codex` `StateRuntime`): a small `Clone`
//! handle wrapping a pooled connection, with the actual queries split
//! across one file per table.

mod lock_repo;
mod loader_repo;
mod signal_repo;
mod source_repo;

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::EngineResult;

pub use loader_repo::{FailureUpdate, LoaderAcquireOutcome};

/// Handle to the engine's control-plane database. Cheap to clone; every
/// clone shares the same underlying pool.
#[derive(Clone)]
pub struct Store {
    pool: Arc<PgPool>,
}

impl Store {
    pub async fn connect(database_url: &str, max_connections: u32) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool: Arc::new(pool) })
    }

    #[cfg(test)]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Apply the embedded schema. Idempotent (`CREATE TABLE IF NOT
    /// EXISTS`); safe to call on every process start.
    pub async fn run_migrations(&self) -> EngineResult<()> {
        sqlx::raw_sql(include_str!("../../migrations/0001_init.sql"))
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
