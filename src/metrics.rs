//! Metrics & Status Projection (`spec.md` §2.9, §6).
//!
//! Per-loader counters and gauges, projected to the HTTP collaborator
//! on demand via [`Metrics::render`] — never on the hot path. Names and
//! labels match `spec.md` §6 exactly; that's the compatibility surface
//! external dashboards depend on.

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::{EngineError, EngineResult};

pub struct Metrics {
    pub executions_total: IntCounterVec,
    pub execution_duration_seconds: HistogramVec,
    pub records_loaded_total: IntCounterVec,
    pub records_ingested_total: IntCounterVec,
    pub running_count: IntGauge,
    pub enabled_count: IntGauge,
    registry: Registry,
}

impl Metrics {
    pub fn new() -> EngineResult<Self> {
        let registry = Registry::new();

        let executions_total = IntCounterVec::new(
            Opts::new("loader_executions_total", "Count of loader executions by terminal status"),
            &["loader_code", "status"],
        )
        .map_err(prom_err)?;

        let execution_duration_seconds = HistogramVec::new(
            HistogramOpts::new("loader_execution_duration_seconds", "Wall-clock duration of a loader execution"),
            &["loader_code"],
        )
        .map_err(prom_err)?;

        let records_loaded_total =
            IntCounterVec::new(Opts::new("loader_records_loaded_total", "Rows returned by the Query Runner"), &["loader_code"])
                .map_err(prom_err)?;

        let records_ingested_total = IntCounterVec::new(
            Opts::new("loader_records_ingested_total", "Rows written by the Ingestion Sink"),
            &["loader_code"],
        )
        .map_err(prom_err)?;

        let running_count = IntGauge::new("loader_running_count", "Loaders currently RUNNING across this process")
            .map_err(prom_err)?;
        let enabled_count = IntGauge::new("loader_enabled_count", "Loaders with enabled=true").map_err(prom_err)?;

        registry.register(Box::new(executions_total.clone())).map_err(prom_err)?;
        registry.register(Box::new(execution_duration_seconds.clone())).map_err(prom_err)?;
        registry.register(Box::new(records_loaded_total.clone())).map_err(prom_err)?;
        registry.register(Box::new(records_ingested_total.clone())).map_err(prom_err)?;
        registry.register(Box::new(running_count.clone())).map_err(prom_err)?;
        registry.register(Box::new(enabled_count.clone())).map_err(prom_err)?;

        Ok(Self {
            executions_total,
            execution_duration_seconds,
            records_loaded_total,
            records_ingested_total,
            running_count,
            enabled_count,
            registry,
        })
    }

    pub fn record_success(&self, loader_code: &str, duration_seconds: f64, rows_loaded: u64, rows_ingested: u64) {
        self.executions_total.with_label_values(&[loader_code, "SUCCESS"]).inc();
        self.execution_duration_seconds.with_label_values(&[loader_code]).observe(duration_seconds);
        self.records_loaded_total.with_label_values(&[loader_code]).inc_by(rows_loaded);
        self.records_ingested_total.with_label_values(&[loader_code]).inc_by(rows_ingested);
    }

    pub fn record_failure(&self, loader_code: &str, duration_seconds: f64) {
        self.executions_total.with_label_values(&[loader_code, "FAILED"]).inc();
        self.execution_duration_seconds.with_label_values(&[loader_code]).observe(duration_seconds);
    }

    /// Refresh the status gauges from a freshly queried snapshot. Called
    /// just before rendering, not on the hot path (`spec.md` §2.9).
    pub fn set_gauges(&self, running: i64, enabled: i64) {
        self.running_count.set(running);
        self.enabled_count.set(enabled);
    }

    /// Render in Prometheus text exposition format for the HTTP
    /// collaborator to scrape.
    pub fn render(&self) -> EngineResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer).map_err(prom_err)?;
        String::from_utf8(buffer).map_err(|e| EngineError::InvalidConfig(format!("metrics encoding produced non-UTF8 output: {e}")))
    }
}

fn prom_err(e: prometheus::Error) -> EngineError {
    EngineError::InvalidConfig(format!("metrics registration failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_success_and_renders() {
        let metrics = Metrics::new().unwrap();
        metrics.record_success("loader_a", 1.5, 10, 10);
        metrics.running_count.set(1);
        metrics.enabled_count.set(5);
        let rendered = metrics.render().unwrap();
        assert!(rendered.contains("loader_executions_total"));
        assert!(rendered.contains("loader_a"));
        assert!(rendered.contains("loader_running_count 1"));
    }

    #[test]
    fn records_failure() {
        let metrics = Metrics::new().unwrap();
        metrics.record_failure("loader_b", 0.2);
        let rendered = metrics.render().unwrap();
        assert!(rendered.contains("FAILED"));
    }
}
