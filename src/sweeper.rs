//! Recovery Sweeper (`spec.md` §4.8).
//!
//! A second, slower-ticking background task independent of the
//! Scheduler: reaps execution locks whose holder has gone silent past
//! `staleLockSeconds`, and returns `FAILED` loaders to `IDLE` once
//! `failedGraceSeconds` has elapsed so the Scheduler picks them back up
//! on its own next tick.

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::error::EngineResult;
use crate::events::{ActivityEvent, EventBus};
use crate::store::Store;

pub struct Sweeper {
    store: Store,
    events: EventBus,
    tick_interval: std::time::Duration,
    stale_lock_seconds: i64,
    failed_grace_seconds: i64,
}

impl Sweeper {
    pub fn new(store: Store, events: EventBus, tick_interval_ms: u64, stale_lock_seconds: i64, failed_grace_seconds: i64) -> Self {
        Self {
            store,
            events,
            tick_interval: std::time::Duration::from_millis(tick_interval_ms.max(1)),
            stale_lock_seconds,
            failed_grace_seconds,
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                warn!(error = %e, "recovery sweeper: tick failed");
            }
        }
    }

    async fn tick(&self) -> EngineResult<()> {
        let now = Utc::now();
        let stale_threshold = Duration::seconds(self.stale_lock_seconds);

        for lock in self.store.list_locks().await? {
            if !lock.is_stale(now, stale_threshold) {
                continue;
            }
            let reason = format!(
                "execution lock for slot {} held by {} went stale (last heartbeat {})",
                lock.slot, lock.holder_id, lock.heartbeat_at
            );
            info!(loader_code = %lock.loader_code, holder_id = %lock.holder_id, "recovery sweeper: reaping stale lock");
            self.store.reap_stale_lock(&lock.loader_code, lock.slot, &reason, now).await?;
        }

        let grace_cutoff = now - Duration::seconds(self.failed_grace_seconds);
        for loader_code in self.store.recover_failed_loaders(grace_cutoff).await? {
            info!(loader_code = %loader_code, "recovery sweeper: grace period elapsed, returning loader to idle");
            self.events.publish(ActivityEvent::LoaderResumed { loader_code });
        }

        Ok(())
    }
}
