//! Activity events (`spec.md` §6), consumed by the dashboard
//! collaborator. The engine publishes every event to the bus; the
//! [`EventLogger`] is the one in-crate subscriber, persisting each
//! event to a per-loader JSONL file for crash-time replay.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ActivityEvent {
    ExecutionSuccess {
        loader_code: String,
        correlation_id: String,
        window_from: DateTime<Utc>,
        window_to: DateTime<Utc>,
        row_count: usize,
        duration_ms: i64,
    },
    ExecutionFailed {
        loader_code: String,
        correlation_id: String,
        reason: String,
        duration_ms: i64,
    },
    LoaderPaused {
        loader_code: String,
    },
    LoaderResumed {
        loader_code: String,
    },
    BackfillCompleted {
        loader_code: String,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    BackfillFailed {
        loader_code: String,
        reason: String,
    },
}

impl ActivityEvent {
    /// The loader this event is about, used by [`EventLogger`] to
    /// scope its JSONL file per loader rather than per process.
    pub fn loader_code(&self) -> &str {
        match self {
            Self::ExecutionSuccess { loader_code, .. }
            | Self::ExecutionFailed { loader_code, .. }
            | Self::LoaderPaused { loader_code }
            | Self::LoaderResumed { loader_code }
            | Self::BackfillCompleted { loader_code, .. }
            | Self::BackfillFailed { loader_code, .. } => loader_code,
        }
    }
}

/// Process-wide broadcast of activity events. Cloneable; every handle
/// shares the same channel. Late subscribers miss events published
/// before they subscribed — matches the teacher's coordinator
/// broadcast-not-queue semantics for notifications.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ActivityEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Returns silently if there are no subscribers —
    /// the engine must never be derailed by a quiet dashboard
    /// collaborator.
    pub fn publish(&self, event: ActivityEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Persists every `ActivityEvent` to a per-loader JSONL file, for
/// crash-time replay — same shape as the teacher's
/// `coordinator::persistence::EventStore`, scoped per loader instead of
/// per execution. Runs as a detached subscriber task for the life of
/// the process; a write failure is logged and the next event is still
/// attempted, since a dashboard/audit-trail outage must never take the
/// engine down with it.
pub struct EventLogger {
    dir: PathBuf,
}

impl EventLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_for(&self, loader_code: &str) -> PathBuf {
        self.dir.join(format!("{loader_code}.jsonl"))
    }

    async fn append(&self, event: &ActivityEvent) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let line = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string()) + "\n";
        let mut file = fs::OpenOptions::new().create(true).append(true).open(self.file_for(event.loader_code())).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }

    /// Subscribe to `bus` and persist every event until the bus (and
    /// every other handle to it) is dropped. Spawned once from
    /// [`crate::engine::Engine::bootstrap`]; the returned handle is not
    /// awaited, matching the Scheduler/Sweeper background-task style.
    pub fn spawn(self, bus: &EventBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Err(e) = self.append(&event).await {
                            tracing::warn!(error = %e, dir = %self.dir.display(), "event logger: failed to persist activity event");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event logger: lagged behind the activity event bus, some events were not persisted");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Read back every persisted event for `loader_code`, oldest first.
    /// Used by crash-time replay and by tests; not on any hot path.
    pub async fn read_for_loader(dir: impl AsRef<Path>, loader_code: &str) -> std::io::Result<Vec<ActivityEvent>> {
        let path = dir.as_ref().join(format!("{loader_code}.jsonl"));
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).await?;
        Ok(content.lines().filter_map(|line| serde_json::from_str(line).ok()).collect())
    }
}
