//! loadkeeper - distributed ETL loader scheduler
//!
//! A watermark-driven scheduler that periodically extracts bounded
//! time-windows of data from MySQL/PostgreSQL source databases into a
//! central signal store, coordinating execution across replicas via a
//! database-backed distributed lock.
//!
//! # Modules
//!
//! - [`domain`] - core types: `Loader`, `SourceDatabase`, `ExecutionLock`, `SignalRecord`, `Window`
//! - [`config`] - configuration types and loading
//! - [`store`] - control-plane persistence
//! - [`crypto`] - at-rest encryption for secrets
//! - [`registry`] - pooled, dialect-agnostic source connections
//! - [`privilege`] - read-only privilege verification
//! - [`planner`] - watermark-driven window planning
//! - [`runner`] - SQL template binding and execution
//! - [`sink`] - ingestion into the signal store
//! - [`executor`] - orchestrates one loader execution end-to-end
//! - [`scheduler`] - fixed-tick dispatch loop
//! - [`sweeper`] - stale-lock reaping and failure recovery
//! - [`engine`] - wiring: constructs and runs the above
//! - [`metrics`] - Prometheus counters and gauges
//! - [`events`] - activity event broadcast
//! - [`cli`] - command-line interface
//! - [`daemon`] - process management (PID file, fork/stop)

pub mod cli;
pub mod config;
pub mod crypto;
pub mod daemon;
pub mod domain;
pub mod dynrow;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod metrics;
pub mod planner;
pub mod privilege;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod sink;
pub mod store;
pub mod sweeper;

pub use config::Config;
pub use domain::{DbType, ExecutionLock, LoadStatus, Loader, PurgeStrategy, SignalRecord, SourceDatabase, Window};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use events::{ActivityEvent, EventBus, EventLogger};
pub use executor::Executor;
pub use metrics::Metrics;
pub use store::Store;
