//! Ingestion Sink (`spec.md` §4.5).
//!
//! Normalizes each row's event timestamp from source-local to UTC,
//! applies the loader's purge strategy when the window overlaps
//! already-ingested territory, and writes transactionally.

use chrono::{DateTime, Duration, Utc};

use crate::domain::{Loader, PurgeStrategy, SignalRecord, Window};
use crate::error::{EngineError, EngineResult};
use crate::runner::QueryResult;
use crate::store::Store;

pub struct IngestOutcome {
    pub records_ingested: usize,
}

/// The field name the Sink looks for in each row to find the event
/// timestamp. Rows are otherwise opaque (`spec.md` §3 `SignalRecord`).
const EVENT_TIMESTAMP_FIELD: &str = "event_timestamp";

/// `previous_watermark` is the loader's `max_ingested_timestamp` — the
/// high-water mark of what has actually been written, as distinct from
/// `last_load_timestamp` (which a backfill rewinds). Passing the latter
/// here would make every overlap check trivially false, since the
/// Planner always sets `window.from = last_load_timestamp`.
pub async fn ingest(
    store: &Store,
    loader: &Loader,
    window: Window,
    previous_watermark: Option<DateTime<Utc>>,
    result: QueryResult,
) -> EngineResult<IngestOutcome> {
    let offset = Duration::hours(loader.source_timezone_offset_hours as i64);

    let mut records = Vec::with_capacity(result.rows.len());
    for row in result.rows {
        let source_local_ts = extract_event_timestamp(&row)?;
        let utc_ts = source_local_ts + offset;
        records.push(SignalRecord {
            loader_code: loader.loader_code.clone(),
            event_timestamp: utc_ts,
            aggregation_period_seconds: loader.aggregation_period_seconds,
            payload: row,
        });
    }

    let overlaps = previous_watermark.is_some_and(|prev| window.overlaps_ingested(prev));

    if overlaps {
        match loader.effective_purge_strategy() {
            PurgeStrategy::FailOnDuplicate => {
                return Err(EngineError::DuplicateWindow {
                    from: window.from.to_rfc3339(),
                    to: window.to.to_rfc3339(),
                });
            }
            PurgeStrategy::PurgeAndReload => {
                store.purge_window(&loader.loader_code, window.from, window.to).await?;
            }
            PurgeStrategy::SkipDuplicates => {
                let prev = previous_watermark.expect("overlaps implies Some");
                records.retain(|r| r.event_timestamp > prev);
            }
        }
    }

    let ingested = store
        .insert_signal_records(&records)
        .await
        .map_err(|e| EngineError::SinkWriteFailed(e.to_string()))?;

    Ok(IngestOutcome { records_ingested: ingested })
}

fn extract_event_timestamp(row: &serde_json::Value) -> EngineResult<DateTime<Utc>> {
    let text = row
        .get(EVENT_TIMESTAMP_FIELD)
        .and_then(|v| v.as_str())
        .ok_or_else(|| EngineError::SinkWriteFailed(format!("row is missing a `{EVENT_TIMESTAMP_FIELD}` column")))?;

    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
                .map(|naive| naive.and_utc())
                .map_err(|e| EngineError::SinkWriteFailed(format!("unparseable event timestamp `{text}`: {e}")))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn extracts_rfc3339_timestamp() {
        let row = serde_json::json!({"event_timestamp": "2024-01-01T00:00:00Z", "value": 1});
        let ts = extract_event_timestamp(&row).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn extracts_naive_sql_timestamp_format() {
        let row = serde_json::json!({"event_timestamp": "2024-01-01 00:00:00.000000"});
        let ts = extract_event_timestamp(&row).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn missing_timestamp_field_is_sink_write_failure() {
        let row = serde_json::json!({"value": 1});
        assert!(extract_event_timestamp(&row).is_err());
    }

    #[test]
    fn window_overlap_detection_matches_domain_helper() {
        let w = Window::new(t(100), t(200)).unwrap();
        assert!(w.overlaps_ingested(t(150)));
        assert!(!w.overlaps_ingested(t(50)));
    }
}
