//! Watermark Planner (`spec.md` §4.3).
//!
//! Pure function over an in-memory [`Loader`] snapshot — no I/O. The
//! Executor is responsible for persisting the watermark seed before
//! acting on [`PlanOutcome::Seed`], and for re-planning afterward.

use chrono::{DateTime, Duration, Utc};

use crate::domain::Window;
use crate::domain::Loader;

/// Result of asking the Planner whether (and how) a loader should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOutcome {
    /// `lastLoadTimestamp` was null; seed it to this instant before
    /// anything else happens (`spec.md` §4.3 step 1).
    Seed(DateTime<Utc>),
    /// Not due yet.
    NotDue,
    /// Due now; execute against this window.
    Due(Window),
}

/// Compute the next execution window for `loader` at `now`, or report
/// that it isn't due / needs watermark seeding.
pub fn plan(loader: &Loader, now: DateTime<Utc>, default_lookback_seconds: i64) -> PlanOutcome {
    let Some(last) = loader.last_load_timestamp else {
        return PlanOutcome::Seed(now - Duration::seconds(default_lookback_seconds));
    };

    let earliest_start = loader
        .last_execution_end
        .map(|end| end + Duration::seconds(loader.min_interval_seconds));
    let cadence_start = loader
        .last_execution_start
        .map(|start| start + Duration::seconds(loader.max_interval_seconds));

    let due_by_schedule = match (earliest_start, cadence_start) {
        (None, None) => true,
        (Some(e), None) => now >= e,
        (None, Some(c)) => now >= c,
        (Some(e), Some(c)) => now >= e.max(c),
    };

    if !(loader.force_next_run || due_by_schedule) {
        return PlanOutcome::NotDue;
    }

    let max_query_period = loader.effective_max_query_period_seconds();
    let mut to = now.min(last + Duration::seconds(max_query_period));
    if let Some(target) = loader.backfill_target {
        to = to.min(target);
    }

    match Window::new(last, to) {
        Some(window) => PlanOutcome::Due(window),
        None => PlanOutcome::NotDue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LoadStatus, PurgeStrategy};
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn base_loader() -> Loader {
        Loader {
            loader_code: "A".into(),
            loader_sql_ciphertext: vec![],
            loader_sql_nonce: vec![],
            source_code: "src1".into(),
            min_interval_seconds: 0,
            max_interval_seconds: 60,
            max_query_period_seconds: 86_400,
            max_parallel_executions: 1,
            source_timezone_offset_hours: 0,
            aggregation_period_seconds: 60,
            purge_strategy: PurgeStrategy::FailOnDuplicate,
            enabled: true,
            load_status: LoadStatus::Idle,
            last_load_timestamp: None,
            max_ingested_timestamp: None,
            last_execution_start: None,
            last_execution_end: None,
            failed_since: None,
            failed_reason: None,
            consecutive_zero_record_runs: 0,
            consecutive_source_failures: 0,
            consecutive_sink_failures: 0,
            force_next_run: false,
            backfill_target: None,
            backfill_purge_strategy_override: None,
            backfill_max_query_period_override: None,
        }
    }

    #[test]
    fn fresh_loader_seeds_watermark() {
        let loader = base_loader();
        let now = t(1_000_000);
        match plan(&loader, now, 86_400) {
            PlanOutcome::Seed(seeded) => assert_eq!(seeded, now - Duration::seconds(86_400)),
            other => panic!("expected Seed, got {other:?}"),
        }
    }

    #[test]
    fn scenario_1_fresh_loader_one_tick() {
        let mut loader = base_loader();
        let now = t(1_000_000);
        loader.last_load_timestamp = Some(now - Duration::seconds(86_400));
        match plan(&loader, now, 86_400) {
            PlanOutcome::Due(window) => {
                assert_eq!(window.from, now - Duration::seconds(86_400));
                assert_eq!(window.to, now);
            }
            other => panic!("expected Due, got {other:?}"),
        }
    }

    #[test]
    fn scenario_2_catch_up_is_segmented() {
        let mut loader = base_loader();
        let now = t(100 * 86_400);
        loader.last_load_timestamp = Some(now - Duration::seconds(10 * 86_400));
        match plan(&loader, now, 86_400) {
            PlanOutcome::Due(window) => {
                assert_eq!(window.from, now - Duration::seconds(10 * 86_400));
                assert_eq!(window.to, now - Duration::seconds(9 * 86_400));
                assert_eq!(window.width(), Duration::seconds(86_400));
            }
            other => panic!("expected Due, got {other:?}"),
        }
    }

    #[test]
    fn not_due_before_cadence_start() {
        let mut loader = base_loader();
        let now = t(1_000_000);
        loader.last_load_timestamp = Some(now - Duration::seconds(30));
        loader.last_execution_start = Some(now - Duration::seconds(30));
        // max_interval_seconds = 60, so cadence_start = now - 30 + 60 = now + 30
        assert_eq!(plan(&loader, now, 86_400), PlanOutcome::NotDue);
    }

    #[test]
    fn not_due_before_min_interval_elapsed() {
        let mut loader = base_loader();
        loader.min_interval_seconds = 120;
        let now = t(1_000_000);
        loader.last_load_timestamp = Some(now - Duration::seconds(500));
        loader.last_execution_end = Some(now - Duration::seconds(60));
        assert_eq!(plan(&loader, now, 86_400), PlanOutcome::NotDue);
    }

    #[test]
    fn force_next_run_overrides_cadence() {
        let mut loader = base_loader();
        let now = t(1_000_000);
        loader.last_load_timestamp = Some(now - Duration::seconds(10));
        loader.last_execution_start = Some(now);
        loader.force_next_run = true;
        assert!(matches!(plan(&loader, now, 86_400), PlanOutcome::Due(_)));
    }

    #[test]
    fn rejects_zero_width_window() {
        let mut loader = base_loader();
        let now = t(1_000_000);
        loader.last_load_timestamp = Some(now);
        assert_eq!(plan(&loader, now, 86_400), PlanOutcome::NotDue);
    }

    #[test]
    fn backfill_target_caps_window_even_past_now() {
        let mut loader = base_loader();
        let now = t(1_000_000);
        loader.last_load_timestamp = Some(now - Duration::seconds(500));
        loader.backfill_target = Some(now - Duration::seconds(400));
        match plan(&loader, now, 86_400) {
            PlanOutcome::Due(window) => assert_eq!(window.to, now - Duration::seconds(400)),
            other => panic!("expected Due, got {other:?}"),
        }
    }
}
