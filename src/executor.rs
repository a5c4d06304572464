//! Loader Executor (`spec.md` §4.6) — runs one execution of one loader
//! end-to-end: acquire lock, gate on privilege, plan, run, ingest,
//! commit, release.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};

use crate::domain::{generate_correlation_id, LoadStatus, Loader};
use crate::error::EngineError;
use crate::events::{ActivityEvent, EventBus};
use crate::metrics::Metrics;
use crate::planner::{self, PlanOutcome};
use crate::privilege;
use crate::registry::SourceRegistry;
use crate::runner;
use crate::sink;
use crate::store::{FailureUpdate, Store};

/// A slot index. Fixed at 0: `maxParallelExecutions > 1` is rejected at
/// `Loader::validate` time (`DESIGN.md` Open Question 1), so every
/// loader has exactly one lock row to contend for.
const SLOT: i32 = 0;

/// Consecutive retryable failures (`SOURCE_UNAVAILABLE`, `TIMEOUT`,
/// `SINK_WRITE_FAILED`) tolerated before the loader transitions to
/// `FAILED` (`spec.md` §7).
const RETRY_THRESHOLD: i32 = 3;

pub struct Executor {
    store: Store,
    registry: Arc<SourceRegistry>,
    encryption_key: crate::crypto::EncryptionKey,
    metrics: Arc<Metrics>,
    events: EventBus,
    holder_id: String,
    default_lookback_seconds: i64,
    stale_lock_seconds: i64,
}

impl Executor {
    pub fn new(
        store: Store,
        registry: Arc<SourceRegistry>,
        encryption_key: crate::crypto::EncryptionKey,
        metrics: Arc<Metrics>,
        events: EventBus,
        holder_id: String,
        default_lookback_seconds: i64,
        stale_lock_seconds: i64,
    ) -> Self {
        Self {
            store,
            registry,
            encryption_key,
            metrics,
            events,
            holder_id,
            default_lookback_seconds,
            stale_lock_seconds,
        }
    }

    /// Run one execution attempt of `loader_code`. Never propagates an
    /// error: every failure is classified and persisted, then this
    /// returns normally so a bad loader can never derail the Scheduler
    /// tick that dispatched it (`spec.md` §7 propagation policy).
    pub async fn execute(&self, loader_code: &str) {
        let correlation_id = generate_correlation_id(loader_code);
        let now = Utc::now();

        let outcome = match self.store.try_acquire(loader_code, SLOT, &self.holder_id, &correlation_id, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(loader_code, error = %e, "executor: lock acquisition failed");
                return;
            }
        };

        use crate::store::loader_repo::LoaderAcquireOutcome::*;
        let loader = match outcome {
            Acquired { loader, .. } => loader,
            SlotTaken | NotSchedulable | NotFound => return,
        };

        self.run_acquired(loader, &correlation_id).await;
    }

    async fn run_acquired(&self, mut loader: Loader, correlation_id: &str) {
        let start = Instant::now();
        let loader_code = loader.loader_code.clone();

        let connection = match self.registry.get_connection(&loader.source_code).await {
            Ok(conn) => conn,
            Err(e) => return self.fail(&loader, correlation_id, e, start).await,
        };

        let report = match privilege::inspect(&connection.pool, connection.db_type).await {
            Ok(report) => report,
            Err(e) => return self.fail(&loader, correlation_id, e, start).await,
        };
        if !report.is_clean() {
            let reason = report.violations.join("; ");
            return self.fail(&loader, correlation_id, EngineError::PrivilegeViolation(reason), start).await;
        }

        let now = Utc::now();
        let mut plan_outcome = planner::plan(&loader, now, self.default_lookback_seconds);
        if let PlanOutcome::Seed(seeded) = plan_outcome {
            if let Err(e) = self.store.seed_watermark_if_null(&loader_code, seeded).await {
                return self.fail(&loader, correlation_id, e, start).await;
            }
            loader.last_load_timestamp = Some(seeded);
            plan_outcome = planner::plan(&loader, now, self.default_lookback_seconds);
        }

        let window = match plan_outcome {
            PlanOutcome::Due(window) => window,
            PlanOutcome::NotDue | PlanOutcome::Seed(_) => {
                if let Err(e) = self.store.release_idle(&loader_code, SLOT).await {
                    warn!(loader_code, error = %e, "executor: release_idle failed");
                }
                return;
            }
        };

        if let Err(e) = self.store.mark_execution_started(&loader_code, now).await {
            return self.fail(&loader, correlation_id, e, start).await;
        }

        let heartbeat_handle = self.spawn_heartbeat(loader_code.clone());

        let run_result = runner::run(&connection.pool, connection.db_type, &loader, window, &self.encryption_key).await;
        let rows = match run_result {
            Ok(rows) => rows,
            Err(e) => {
                heartbeat_handle.abort();
                return self.fail(&loader, correlation_id, e, start).await;
            }
        };
        let row_count = rows.rows.len();

        let ingest_result = sink::ingest(&self.store, &loader, window, loader.max_ingested_timestamp, rows).await;
        heartbeat_handle.abort();

        match ingest_result {
            Ok(outcome) => {
                match self
                    .store
                    .commit_success(&loader_code, SLOT, correlation_id, window.to, outcome.records_ingested, Utc::now())
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => return self.fail(&loader, correlation_id, EngineError::StateLost, start).await,
                    Err(e) => {
                        warn!(loader_code, error = %e, "executor: commit_success failed");
                        return;
                    }
                }
                let duration = start.elapsed();
                self.metrics.record_success(&loader_code, duration.as_secs_f64(), row_count as u64, outcome.records_ingested as u64);
                self.events.publish(ActivityEvent::ExecutionSuccess {
                    loader_code: loader_code.clone(),
                    correlation_id: correlation_id.to_string(),
                    window_from: window.from,
                    window_to: window.to,
                    row_count,
                    duration_ms: duration.as_millis() as i64,
                });
                if let Some(target) = loader.backfill_target {
                    if window.to >= target {
                        self.events.publish(ActivityEvent::BackfillCompleted {
                            loader_code: loader_code.clone(),
                            from: window.from,
                            to: target,
                        });
                    }
                }
                info!(
                    loaderCode = %loader_code,
                    window.from = %window.from,
                    window.to = %window.to,
                    rowCount = row_count,
                    durationMs = duration.as_millis(),
                    status = "SUCCESS",
                    "loader execution completed"
                );
            }
            Err(e) => self.fail(&loader, correlation_id, e, start).await,
        }
    }

    async fn fail(&self, loader: &Loader, correlation_id: &str, error: EngineError, start: Instant) {
        let now = Utc::now();
        let loader_code = &loader.loader_code;

        if matches!(error, EngineError::StateLost) {
            if let Err(e) = self.store.discard_state_lost(loader_code).await {
                warn!(loader_code, error = %e, "executor: discard_state_lost failed");
            }
            return;
        }

        let (mut source_failures, mut sink_failures, immediately_fatal) = match &error {
            EngineError::SourceUnavailable(_) | EngineError::Timeout(_) => {
                (loader.consecutive_source_failures + 1, loader.consecutive_sink_failures, false)
            }
            EngineError::SinkWriteFailed(_) => (loader.consecutive_source_failures, loader.consecutive_sink_failures + 1, false),
            _ => (loader.consecutive_source_failures, loader.consecutive_sink_failures, true),
        };
        source_failures = source_failures.min(RETRY_THRESHOLD);
        sink_failures = sink_failures.min(RETRY_THRESHOLD);

        let becomes_failed = immediately_fatal || source_failures >= RETRY_THRESHOLD || sink_failures >= RETRY_THRESHOLD;
        let reason = error.to_string();

        let update = FailureUpdate {
            new_status: if becomes_failed { LoadStatus::Failed } else { LoadStatus::Idle },
            failed_since: becomes_failed.then_some(now),
            failed_reason: becomes_failed.then(|| reason.clone()),
            consecutive_source_failures: source_failures,
            consecutive_sink_failures: sink_failures,
        };

        match self.store.commit_failure(loader_code, SLOT, correlation_id, now, update).await {
            Ok(true) => {}
            Ok(false) => {
                // The lock this holder started with is already gone
                // (the Sweeper reaped it and moved the loader to FAILED
                // itself): nothing left for this stale run to commit.
                if let Err(e) = self.store.discard_state_lost(loader_code).await {
                    warn!(loader_code, error = %e, "executor: discard_state_lost failed");
                }
                return;
            }
            Err(e) => {
                warn!(loader_code, error = %e, "executor: commit_failure failed");
                return;
            }
        }

        let duration = start.elapsed();
        self.metrics.record_failure(loader_code, duration.as_secs_f64());
        self.events.publish(ActivityEvent::ExecutionFailed {
            loader_code: loader_code.clone(),
            correlation_id: correlation_id.to_string(),
            reason: reason.clone(),
            duration_ms: duration.as_millis() as i64,
        });
        if becomes_failed && loader.is_backfilling() {
            self.events.publish(ActivityEvent::BackfillFailed {
                loader_code: loader_code.clone(),
                reason: reason.clone(),
            });
        }
        warn!(
            loaderCode = %loader_code,
            durationMs = duration.as_millis(),
            status = "FAILED",
            reason = %reason,
            becomesFailed = becomes_failed,
            "loader execution failed"
        );
    }

    fn spawn_heartbeat(&self, loader_code: String) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let interval = std::time::Duration::from_secs((self.stale_lock_seconds.max(2) / 2) as u64);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if store.heartbeat(&loader_code, SLOT, Utc::now()).await.is_err() {
                    break;
                }
            }
        })
    }
}
