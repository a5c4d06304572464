//! loadkeeper - distributed ETL loader scheduler
//!
//! CLI entry point: daemon process control plus the admin commands
//! operators use to pause, resume, force-run, and backfill loaders.

use clap::Parser;
use eyre::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing::info;

use loadkeeper::cli::{Cli, Command, OutputFormat};
use loadkeeper::config::Config;
use loadkeeper::daemon::DaemonManager;
use loadkeeper::engine::Engine;

fn setup_logging(filter: &str) -> Result<()> {
    let log_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("loadkeeper").join("logs");
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();

    info!("Logging initialized");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(&config.logging.filter).context("Failed to setup logging")?;

    match cli.command {
        None | Some(Command::Status { .. }) => {
            let manager = DaemonManager::new();
            let status = manager.status();
            let format = match cli.command {
                Some(Command::Status { format }) => format,
                _ => OutputFormat::Text,
            };
            print_status(&status, &format);
        }
        Some(Command::Start { foreground }) => {
            let manager = DaemonManager::new();
            if foreground {
                manager.register_self()?;
                run_daemon(config)?;
            } else {
                let pid = manager.start()?;
                println!("loadkeeper started (pid {pid})");
            }
        }
        Some(Command::Stop) => {
            DaemonManager::new().stop()?;
            println!("loadkeeper stopped");
        }
        Some(Command::RunDaemon) => {
            DaemonManager::new().register_self()?;
            run_daemon(config)?;
        }
        Some(Command::Pause { loader_code }) => run_admin(config, |engine| async move { engine.pause(&loader_code).await })?,
        Some(Command::Resume { loader_code }) => run_admin(config, |engine| async move { engine.resume(&loader_code).await })?,
        Some(Command::ForceRun { loader_code }) => {
            run_admin(config, |engine| async move { engine.force_next_run(&loader_code).await })?
        }
        Some(Command::Backfill { loader_code, from, to, purge_strategy }) => {
            run_admin(config, |engine| async move { engine.backfill(&loader_code, from, to, purge_strategy).await })?
        }
    }

    Ok(())
}

fn run_daemon(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async move {
        let holder_id = format!("{}-{}", hostname_or_unknown(), std::process::id());
        let engine = Engine::bootstrap(&config, holder_id).await.context("Failed to bootstrap engine")?;
        info!("loadkeeper engine running");
        engine.run_until_shutdown().await.context("Engine run loop failed")
    })
}

/// Run a single admin command against a freshly-bootstrapped engine,
/// without starting the Scheduler or Recovery Sweeper ticks.
fn run_admin<F, Fut>(config: Config, action: F) -> Result<()>
where
    F: FnOnce(std::sync::Arc<Engine>) -> Fut,
    Fut: std::future::Future<Output = loadkeeper::error::EngineResult<()>>,
{
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async move {
        let holder_id = format!("{}-admin-{}", hostname_or_unknown(), std::process::id());
        let engine = std::sync::Arc::new(Engine::bootstrap(&config, holder_id).await.context("Failed to bootstrap engine")?);
        action(engine).await.context("Admin command failed")?;
        println!("ok");
        Ok(())
    })
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

fn print_status(status: &loadkeeper::daemon::DaemonStatus, format: &OutputFormat) {
    match format {
        OutputFormat::Text => {
            if status.running {
                println!("loadkeeper is running (pid {})", status.pid.unwrap_or_default());
            } else {
                println!("loadkeeper is not running");
            }
        }
        OutputFormat::Json => {
            println!(
                "{{\"running\":{},\"pid\":{}}}",
                status.running,
                status.pid.map(|p| p.to_string()).unwrap_or_else(|| "null".to_string())
            );
        }
    }
}
