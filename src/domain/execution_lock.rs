//! ExecutionLock domain type — the cross-replica mutual-exclusion row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row keyed by `(loader_code, slot)`. Created on execution start,
/// updated during long runs via heartbeat, deleted on completion. Only
/// the Recovery Sweeper may reap rows whose `heartbeat_at` is stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLock {
    pub loader_code: String,
    pub slot: i32,
    pub holder_id: String,
    pub correlation_id: String,
    pub acquired_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
}

impl ExecutionLock {
    pub fn new(loader_code: impl Into<String>, slot: i32, holder_id: impl Into<String>, correlation_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            loader_code: loader_code.into(),
            slot,
            holder_id: holder_id.into(),
            correlation_id: correlation_id.into(),
            acquired_at: now,
            heartbeat_at: now,
        }
    }

    /// Whether this lock's heartbeat has aged past `stale_threshold`,
    /// meaning its holder is presumed dead.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_threshold: chrono::Duration) -> bool {
        now - self.heartbeat_at > stale_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn detects_stale_lock() {
        let acquired = Utc.timestamp_opt(1_000, 0).unwrap();
        let lock = ExecutionLock::new("A", 0, "replica-1", "abc-exec-A", acquired);

        let still_fresh = acquired + Duration::seconds(60);
        assert!(!lock.is_stale(still_fresh, Duration::seconds(120)));

        let gone_stale = acquired + Duration::seconds(121);
        assert!(lock.is_stale(gone_stale, Duration::seconds(120)));
    }
}
