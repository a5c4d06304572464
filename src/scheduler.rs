//! Scheduler (`spec.md` §4.7).
//!
//! A fixed-tick loop, not an event queue: once per tick it lists
//! schedulable loaders, filters out anything the Planner wouldn't act
//! on anyway (so a crowded tick doesn't burn worker-pool slots on
//! no-ops), and dispatches the rest to a bounded pool of concurrent
//! Executor runs. Saturating the pool ends the tick early rather than
//! queuing — the next tick picks up where this one left off.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Semaphore;
use tokio::time::interval;
use tracing::{debug, warn};

use crate::domain::LoadStatus;
use crate::error::EngineResult;
use crate::executor::Executor;
use crate::planner::{self, PlanOutcome};
use crate::store::Store;

pub struct Scheduler {
    store: Store,
    executor: Arc<Executor>,
    semaphore: Arc<Semaphore>,
    tick_interval: std::time::Duration,
    default_lookback_seconds: i64,
    failed_grace_seconds: i64,
}

impl Scheduler {
    pub fn new(
        store: Store,
        executor: Arc<Executor>,
        worker_pool_size: usize,
        tick_interval_ms: u64,
        default_lookback_seconds: i64,
        failed_grace_seconds: i64,
    ) -> Self {
        Self {
            store,
            executor,
            semaphore: Arc::new(Semaphore::new(worker_pool_size.max(1))),
            tick_interval: std::time::Duration::from_millis(tick_interval_ms.max(1)),
            default_lookback_seconds,
            failed_grace_seconds,
        }
    }

    /// Tick forever. Intended to be spawned as its own task and run for
    /// the life of the process.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.tick_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                warn!(error = %e, "scheduler: tick failed");
            }
        }
    }

    async fn tick(&self) -> EngineResult<()> {
        let now = Utc::now();
        let grace_cutoff = now - Duration::seconds(self.failed_grace_seconds);

        for loader in self.store.list_schedulable().await? {
            // §4.7 step 2: a FAILED loader stays off the schedule until
            // its grace period elapses, unless an operator forced it.
            if loader.load_status == LoadStatus::Failed
                && !loader.force_next_run
                && loader.failed_since.is_some_and(|since| since >= grace_cutoff)
            {
                continue;
            }

            if matches!(planner::plan(&loader, now, self.default_lookback_seconds), PlanOutcome::NotDue) {
                continue;
            }

            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                debug!("scheduler: worker pool saturated, ending tick early");
                break;
            };

            let executor = Arc::clone(&self.executor);
            let loader_code = loader.loader_code.clone();
            tokio::spawn(async move {
                executor.execute(&loader_code).await;
                drop(permit);
            });
        }

        Ok(())
    }
}
