//! Engine error taxonomy
//!
//! One variant per error kind named in `spec.md` §7. The Executor is the
//! only place that classifies these into a persisted `loadStatus`/
//! `failedReason`; every other component propagates with `?` and never
//! leaks a raw driver error past the Executor boundary.

use thiserror::Error;

/// Errors the engine's components can raise. Kinds match `spec.md` §7
/// exactly; this is deliberately a flat enum rather than a kind-of-kind
/// hierarchy, mirroring how the teacher keeps `StateError` flat.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("privilege violation: {0}")]
    PrivilegeViolation(String),

    #[error("SQL syntax error: {0}")]
    SqlSyntax(String),

    #[error("statement or transaction timed out: {0}")]
    Timeout(String),

    #[error("duplicate window: loader has already ingested part of [{from}, {to}]")]
    DuplicateWindow { from: String, to: String },

    #[error("sink write failed: {0}")]
    SinkWriteFailed(String),

    #[error("execution lock was reaped mid-run; discarding without advancing watermark")]
    StateLost,

    #[error("loader configuration invalid: {0}")]
    InvalidConfig(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("encryption error: {0}")]
    Crypto(String),
}

impl EngineError {
    /// Error kind name as it appears in `spec.md` §7 and in persisted
    /// `failed_reason` strings / metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable(_) => "SOURCE_UNAVAILABLE",
            Self::PrivilegeViolation(_) => "PRIVILEGE_VIOLATION",
            Self::SqlSyntax(_) => "SQL_SYNTAX",
            Self::Timeout(_) => "TIMEOUT",
            Self::DuplicateWindow { .. } => "DUPLICATE_WINDOW",
            Self::SinkWriteFailed(_) => "SINK_WRITE_FAILED",
            Self::StateLost => "STATE_LOST",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Database(_) => "DATABASE",
            Self::Crypto(_) => "CRYPTO",
        }
    }

    /// Whether this error is implicitly retried on the next scheduler
    /// tick (as opposed to being fatal for the run).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SourceUnavailable(_) | Self::Timeout(_) | Self::SinkWriteFailed(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(EngineError::SourceUnavailable("x".into()).is_retryable());
        assert!(EngineError::Timeout("x".into()).is_retryable());
        assert!(EngineError::SinkWriteFailed("x".into()).is_retryable());
        assert!(!EngineError::PrivilegeViolation("x".into()).is_retryable());
        assert!(!EngineError::SqlSyntax("x".into()).is_retryable());
        assert!(!EngineError::StateLost.is_retryable());
    }

    #[test]
    fn kind_names_match_spec_taxonomy() {
        assert_eq!(EngineError::SourceUnavailable("x".into()).kind(), "SOURCE_UNAVAILABLE");
        assert_eq!(EngineError::PrivilegeViolation("x".into()).kind(), "PRIVILEGE_VIOLATION");
        assert_eq!(EngineError::SqlSyntax("x".into()).kind(), "SQL_SYNTAX");
        assert_eq!(EngineError::Timeout("x".into()).kind(), "TIMEOUT");
        assert_eq!(
            EngineError::DuplicateWindow { from: "a".into(), to: "b".into() }.kind(),
            "DUPLICATE_WINDOW"
        );
        assert_eq!(EngineError::SinkWriteFailed("x".into()).kind(), "SINK_WRITE_FAILED");
        assert_eq!(EngineError::StateLost.kind(), "STATE_LOST");
    }
}
