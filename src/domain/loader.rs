//! Loader domain type
//!
//! A `Loader` is a configured ETL pipeline: source + SQL + schedule +
//! watermark. This is the record the Scheduler, Executor, Planner, and
//! Sink all operate on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Runtime state of a loader, persisted in the `loader` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    #[default]
    Idle,
    Running,
    Failed,
    Paused,
}

impl std::fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Failed => write!(f, "failed"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

impl std::str::FromStr for LoadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "failed" => Ok(Self::Failed),
            "paused" => Ok(Self::Paused),
            _ => Err(format!("Unknown load status: {s}")),
        }
    }
}

/// Policy applied when a window overlaps already-ingested territory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurgeStrategy {
    FailOnDuplicate,
    PurgeAndReload,
    SkipDuplicates,
}

impl std::fmt::Display for PurgeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FailOnDuplicate => write!(f, "fail_on_duplicate"),
            Self::PurgeAndReload => write!(f, "purge_and_reload"),
            Self::SkipDuplicates => write!(f, "skip_duplicates"),
        }
    }
}

impl std::str::FromStr for PurgeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fail_on_duplicate" => Ok(Self::FailOnDuplicate),
            "purge_and_reload" => Ok(Self::PurgeAndReload),
            "skip_duplicates" => Ok(Self::SkipDuplicates),
            _ => Err(format!("Unknown purge strategy: {s}")),
        }
    }
}

/// A configured ETL pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loader {
    pub loader_code: String,

    /// Authenticated-encrypted at rest; decrypted only transiently by the
    /// Query Runner. See [`crate::crypto`].
    pub loader_sql_ciphertext: Vec<u8>,
    pub loader_sql_nonce: Vec<u8>,

    pub source_code: String,

    pub min_interval_seconds: i64,
    pub max_interval_seconds: i64,
    pub max_query_period_seconds: i64,
    pub max_parallel_executions: i32,
    pub source_timezone_offset_hours: i32,
    pub aggregation_period_seconds: i64,
    pub purge_strategy: PurgeStrategy,

    pub enabled: bool,
    pub load_status: LoadStatus,

    pub last_load_timestamp: Option<DateTime<Utc>>,
    /// High-water mark of what has actually been ingested. Advanced by
    /// `commit_success` alongside `last_load_timestamp` in the normal
    /// case, but — unlike `last_load_timestamp` — never rewound by a
    /// backfill, so the Sink can still tell whether a backfilled window
    /// re-covers already-ingested territory (`spec.md` §4.5, §6).
    pub max_ingested_timestamp: Option<DateTime<Utc>>,
    /// Start instant of the most recently *begun* execution; used for the
    /// `cadenceStart` term of the due-check (§4.3 step 2).
    pub last_execution_start: Option<DateTime<Utc>>,
    /// End instant of the most recently *completed* execution; used for
    /// the `earliestStart` term of the due-check.
    pub last_execution_end: Option<DateTime<Utc>>,

    pub failed_since: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
    pub consecutive_zero_record_runs: i64,
    pub consecutive_source_failures: i32,
    pub consecutive_sink_failures: i32,

    /// Administrative force-start flag (§6: "or via a `force_next_run`
    /// flag" — the variant this engine implements, since rewinding the
    /// watermark itself would conflate force-start with a backfill).
    /// Cleared by the Executor once it has been consulted for one due
    /// check.
    pub force_next_run: bool,

    /// Backfill in progress: target watermark to catch up to. `None`
    /// when no backfill is active.
    pub backfill_target: Option<DateTime<Utc>>,
    /// Purge strategy override for the duration of an active backfill.
    pub backfill_purge_strategy_override: Option<PurgeStrategy>,
    /// `maxQueryPeriodSeconds` override for the duration of an active
    /// backfill.
    pub backfill_max_query_period_override: Option<i64>,
}

impl Loader {
    /// Validate the invariants `spec.md` §3 places on a loader's
    /// configuration. Called before a loader is admitted to the
    /// schedule (and by the config-driven loader catalog loader, if
    /// one is layered on top of this crate externally).
    pub fn validate(&self) -> Result<(), String> {
        if self.min_interval_seconds < 0 {
            return Err("minIntervalSeconds must be >= 0".into());
        }
        if self.max_interval_seconds <= 0 {
            return Err("maxIntervalSeconds must be > 0".into());
        }
        if self.max_query_period_seconds <= 0 {
            return Err("maxQueryPeriodSeconds must be > 0".into());
        }
        if self.max_parallel_executions < 1 {
            return Err("maxParallelExecutions must be >= 1".into());
        }
        if self.max_parallel_executions > 1 {
            // Open question resolved per spec.md §9 / DESIGN.md: reject
            // values > 1 rather than silently allow concurrent watermark
            // writes without a partition scheme.
            return Err(
                "maxParallelExecutions > 1 is not supported: the engine does not \
                 partition windows across slots, so concurrent holders would race \
                 on the same watermark row"
                    .into(),
            );
        }
        Ok(())
    }

    /// Whether this loader is a scheduling candidate at all (enabled and
    /// not paused/running). `FAILED` loaders are still candidates; the
    /// Scheduler decides separately whether their grace period has
    /// elapsed.
    pub fn is_schedulable(&self) -> bool {
        self.enabled && matches!(self.load_status, LoadStatus::Idle | LoadStatus::Failed)
    }

    /// Whether a backfill is currently overriding this loader's normal
    /// watermark/strategy/window-width behavior.
    pub fn is_backfilling(&self) -> bool {
        self.backfill_target.is_some()
    }

    /// `maxQueryPeriodSeconds` as it should be applied right now: the
    /// backfill override when one is active, otherwise the loader's own
    /// configured value.
    pub fn effective_max_query_period_seconds(&self) -> i64 {
        self.backfill_max_query_period_override.unwrap_or(self.max_query_period_seconds)
    }

    /// `purgeStrategy` as it should be applied right now.
    pub fn effective_purge_strategy(&self) -> PurgeStrategy {
        self.backfill_purge_strategy_override.unwrap_or(self.purge_strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_loader() -> Loader {
        Loader {
            loader_code: "A".into(),
            loader_sql_ciphertext: vec![],
            loader_sql_nonce: vec![],
            source_code: "src1".into(),
            min_interval_seconds: 0,
            max_interval_seconds: 60,
            max_query_period_seconds: 86400,
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
    fn validates_default_loader() {
        assert!(base_loader().validate().is_ok());
    }

    #[test]
    fn rejects_negative_min_interval() {
        let mut l = base_loader();
        l.min_interval_seconds = -1;
        assert!(l.validate().is_err());
    }

    #[test]
    fn rejects_zero_max_interval() {
        let mut l = base_loader();
        l.max_interval_seconds = 0;
        assert!(l.validate().is_err());
    }

    #[test]
    fn rejects_parallel_executions_above_one() {
        let mut l = base_loader();
        l.max_parallel_executions = 2;
        assert!(l.validate().is_err());
    }

    #[test]
    fn schedulable_requires_enabled_and_idle_or_failed() {
        let mut l = base_loader();
        assert!(l.is_schedulable());

        l.enabled = false;
        assert!(!l.is_schedulable());

        l.enabled = true;
        l.load_status = LoadStatus::Paused;
        assert!(!l.is_schedulable());

        l.load_status = LoadStatus::Failed;
        assert!(l.is_schedulable());

        l.load_status = LoadStatus::Running;
        assert!(!l.is_schedulable());
    }

    #[test]
    fn load_status_roundtrips_through_display_and_fromstr() {
        for s in [LoadStatus::Idle, LoadStatus::Running, LoadStatus::Failed, LoadStatus::Paused] {
            let text = s.to_string();
            let parsed: LoadStatus = text.parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn purge_strategy_roundtrips() {
        for s in [
            PurgeStrategy::FailOnDuplicate,
            PurgeStrategy::PurgeAndReload,
            PurgeStrategy::SkipDuplicates,
        ] {
            let text = s.to_string();
            let parsed: PurgeStrategy = text.parse().unwrap();
            assert_eq!(parsed, s);
        }
    }
}
