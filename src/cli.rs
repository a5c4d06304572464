//! CLI command definitions and subcommands

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::PurgeStrategy;

/// loadkeeper - distributed ETL loader scheduler
#[derive(Parser)]
#[command(
    name = "loadkeeper",
    about = "Watermark-driven ETL loader scheduler",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/loadkeeper/logs/loadkeeper.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Start the engine in the background
    Start {
        /// Don't fork to background (run in foreground)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop the running engine
    Stop,

    /// Show engine status
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Internal: Run as the engine process (used by `start`)
    #[command(hide = true)]
    RunDaemon,

    /// Pause a loader: the Scheduler will skip it until resumed
    Pause {
        /// Loader code to pause
        loader_code: String,
    },

    /// Resume a paused or failed loader
    Resume {
        /// Loader code to resume
        loader_code: String,
    },

    /// Force a loader to run on the Scheduler's next eligible tick,
    /// bypassing its cadence (but not a PAUSED state)
    ForceRun {
        /// Loader code to force
        loader_code: String,
    },

    /// Request a backfill: rewind the watermark to `from` and cap
    /// subsequent windows at `to`
    Backfill {
        /// Loader code to backfill
        loader_code: String,

        /// Start of the backfill range (RFC3339)
        #[arg(long)]
        from: DateTime<Utc>,

        /// End of the backfill range (RFC3339)
        #[arg(long)]
        to: DateTime<Utc>,

        /// Purge strategy override while the backfill is active
        #[arg(long, default_value = "purge_and_reload")]
        purge_strategy: PurgeStrategy,
    },
}

/// Output format for status/metrics commands
#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {s}. Use: text or json")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
