//! SignalRecord domain type — a row produced by a loader run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A row destined for the central signal store. The event timestamp is
/// always normalized to UTC before this type is constructed (the
/// Ingestion Sink owns that translation); the engine treats the rest of
/// the payload as opaque JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRecord {
    pub loader_code: String,
    pub event_timestamp: DateTime<Utc>,
    pub aggregation_period_seconds: i64,
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn carries_opaque_payload_through_serde() {
        let record = SignalRecord {
            loader_code: "A".into(),
            event_timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            aggregation_period_seconds: 60,
            payload: serde_json::json!({"metric": "requests", "value": 42}),
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: SignalRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.payload["value"], 42);
        assert_eq!(back.loader_code, "A");
    }
}
