//! Domain types for the loader engine
//!
//! Core domain types: [`Loader`], [`SourceDatabase`], [`ExecutionLock`],
//! [`SignalRecord`], and the small value types ([`Window`], [`PurgeStrategy`],
//! [`LoadStatus`], [`DbType`]) that thread through the rest of the crate.

mod execution_lock;
mod id;
mod loader;
mod signal_record;
mod source_database;
mod window;

pub use execution_lock::ExecutionLock;
pub use id::generate_correlation_id;
pub use loader::{Loader, LoadStatus, PurgeStrategy};
pub use signal_record::SignalRecord;
pub use source_database::{DbType, SourceDatabase};
pub use window::Window;
