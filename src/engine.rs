//! Engine wiring (`spec.md` §2).
//!
//! Constructs every long-lived collaborator from [`Config`] and runs
//! the Scheduler and Recovery Sweeper for the life of the process. The
//! CLI's admin subcommands and the HTTP/metrics collaborator both hold
//! an [`Engine`] rather than reaching into `Store` directly, so the
//! activity-event side effects of an admin action never get forgotten.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::crypto::EncryptionKey;
use crate::domain::PurgeStrategy;
use crate::error::EngineResult;
use crate::events::{ActivityEvent, EventBus, EventLogger};
use crate::executor::Executor;
use crate::metrics::Metrics;
use crate::registry::SourceRegistry;
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::sweeper::Sweeper;

pub struct Engine {
    pub store: Store,
    pub registry: Arc<SourceRegistry>,
    pub metrics: Arc<Metrics>,
    pub events: EventBus,
    scheduler: Arc<Scheduler>,
    sweeper: Sweeper,
}

impl Engine {
    /// Connect to the control-plane database, apply the schema, and
    /// construct every collaborator. Does not start ticking — call
    /// [`Engine::run_until_shutdown`] for that.
    pub async fn bootstrap(config: &Config, holder_id: String) -> EngineResult<Self> {
        let store = Store::connect(&config.database.control_plane_url, config.database.max_connections).await?;
        store.run_migrations().await?;

        let encryption_key = EncryptionKey::from_env(&config.database.encryption_key_env)?;
        let registry = Arc::new(SourceRegistry::new(store.clone(), encryption_key.clone(), config.source.pool_max));
        let metrics = Arc::new(Metrics::new()?);
        let events = EventBus::default();

        let executor = Arc::new(Executor::new(
            store.clone(),
            Arc::clone(&registry),
            encryption_key,
            Arc::clone(&metrics),
            events.clone(),
            holder_id,
            config.scheduler.default_lookback_seconds,
            config.recovery.stale_lock_seconds,
        ));

        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            executor,
            config.scheduler.worker_pool_size,
            config.scheduler.tick_interval_ms,
            config.scheduler.default_lookback_seconds,
            config.recovery.failed_grace_seconds,
        ));

        let sweeper = Sweeper::new(
            store.clone(),
            events.clone(),
            config.recovery.tick_interval_ms,
            config.recovery.stale_lock_seconds,
            config.recovery.failed_grace_seconds,
        );

        if let Some(dir) = &config.logging.event_log_dir {
            EventLogger::new(dir.clone()).spawn(&events);
        }

        Ok(Self {
            store,
            registry,
            metrics,
            events,
            scheduler,
            sweeper,
        })
    }

    /// Run the Scheduler and Recovery Sweeper as concurrent background
    /// tasks until the process receives an interrupt signal.
    pub async fn run_until_shutdown(self) -> EngineResult<()> {
        let scheduler_task = tokio::spawn(Arc::clone(&self.scheduler).run());
        let sweeper_task = tokio::spawn(self.sweeper.run());

        tokio::select! {
            _ = scheduler_task => {}
            _ = sweeper_task => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("engine: shutdown signal received, stopping");
            }
        }
        Ok(())
    }

    pub async fn pause(&self, loader_code: &str) -> EngineResult<()> {
        self.store.pause(loader_code).await?;
        self.events.publish(ActivityEvent::LoaderPaused {
            loader_code: loader_code.to_string(),
        });
        Ok(())
    }

    pub async fn resume(&self, loader_code: &str) -> EngineResult<()> {
        self.store.resume(loader_code).await?;
        self.events.publish(ActivityEvent::LoaderResumed {
            loader_code: loader_code.to_string(),
        });
        Ok(())
    }

    pub async fn force_next_run(&self, loader_code: &str) -> EngineResult<()> {
        self.store.force_next_run(loader_code).await
    }

    /// Accept an administrative backfill request. The `BackfillCompleted`
    /// / `BackfillFailed` activity events fire later, from the Executor,
    /// once an execution actually reaches (or fails to reach) `to`.
    pub async fn backfill(
        &self,
        loader_code: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        purge_strategy: PurgeStrategy,
    ) -> EngineResult<()> {
        self.store.apply_backfill(loader_code, from, to, purge_strategy).await
    }

    /// Refresh the status gauges from the current `loader` table and
    /// render in Prometheus text exposition format.
    pub async fn metrics_text(&self) -> EngineResult<String> {
        let (running, enabled) = self.store.gauge_counts().await?;
        self.metrics.set_gauges(running, enabled);
        self.metrics.render()
    }
}
