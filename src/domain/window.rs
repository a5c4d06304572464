//! Time window type shared by the Watermark Planner, Query Runner, and
//! Ingestion Sink.

use chrono::{DateTime, Duration, Utc};

/// A half-open interval of UTC instants: `[from, to)`.
///
/// `from`/`to` are always UTC and are what gets persisted into
/// `Loader.last_load_timestamp`. Source-local instants (offset-adjusted,
/// for binding into the loader's SQL template) are derived on demand via
/// [`Window::source_local`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Window {
    /// Construct a window, rejecting zero-width or inverted intervals.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Option<Self> {
        if to <= from {
            return None;
        }
        Some(Self { from, to })
    }

    /// Width of the window.
    pub fn width(&self) -> Duration {
        self.to - self.from
    }

    /// Whether this window overlaps territory already ingested up to
    /// `previous_watermark`.
    pub fn overlaps_ingested(&self, previous_watermark: DateTime<Utc>) -> bool {
        self.from < previous_watermark
    }

    /// Translate this UTC window into source-local instants by applying
    /// `sourceTimezoneOffsetHours`. The raw UTC values are retained
    /// elsewhere for watermark accounting; only the returned pair is
    /// suitable for binding into the source dialect's SQL.
    pub fn source_local(&self, offset_hours: i32) -> (DateTime<Utc>, DateTime<Utc>) {
        let offset = Duration::hours(offset_hours as i64);
        (self.from - offset, self.to - offset)
    }
}
