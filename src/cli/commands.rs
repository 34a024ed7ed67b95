//! CLI command definitions for crash-monitor.
//!
//! Provides commands for running the scheduler, managing the database
//! schema, and queueing priority requests from the command line.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use crate::config::MonitorConfig;
use crate::crashstore::MemoryCrashStorage;
use crate::monitor::Monitor;
use crate::shutdown;
use crate::store::{JobStore, MigrationRunner, PgJobStore};
use tokio_util::sync::CancellationToken;

/// Default PostgreSQL connection URL for local development.
const DEFAULT_DATABASE_URL: &str = "postgres://localhost/crash_monitor";

/// Crash report job scheduler.
#[derive(Parser)]
#[command(name = "crash-monitor")]
#[command(about = "Schedule crash report processing jobs across a processor fleet")]
#[command(version)]
#[command(
    long_about = "crash-monitor watches crash storage for newly arrived reports, assigns each \
one to the least-loaded live processor, recovers work from processors that stop checking in, \
services operator priority requests, and reclaims finished job rows.\n\nExample usage:\n  \
crash-monitor migrate\n  crash-monitor run --standard-loop-delay 300"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the scheduler until SIGINT/SIGTERM or a fatal condition.
    Run(RunArgs),

    /// Apply pending database migrations.
    Migrate(MigrateArgs),

    /// Queue crash ids for expedited processing.
    #[command(alias = "prio")]
    Prioritize(PrioritizeArgs),
}

/// Arguments for `crash-monitor run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// PostgreSQL connection URL for the job store.
    #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    pub database_url: String,

    /// Seconds between standard allocation passes.
    #[arg(long, default_value = "300")]
    pub standard_loop_delay: u64,

    /// Seconds between priority passes.
    #[arg(long, default_value = "60")]
    pub priority_loop_delay: u64,

    /// Seconds between cleanup passes.
    #[arg(long, default_value = "300")]
    pub cleanup_loop_delay: u64,

    /// Seconds between expected processor check-ins. A processor missing
    /// two check-ins is considered dead.
    #[arg(long, default_value = "300")]
    pub processor_check_in_delay: u64,

    /// Apply pending migrations before starting.
    #[arg(long)]
    pub migrate: bool,
}

/// Arguments for `crash-monitor migrate`.
#[derive(Parser, Debug)]
pub struct MigrateArgs {
    /// PostgreSQL connection URL for the job store.
    #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    pub database_url: String,

    /// Drop all tables and re-apply every migration. Destroys all data.
    #[arg(long)]
    pub reset: bool,
}

/// Arguments for `crash-monitor prioritize`.
#[derive(Parser, Debug)]
pub struct PrioritizeArgs {
    /// PostgreSQL connection URL for the job store.
    #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    pub database_url: String,

    /// Crash ids to expedite.
    #[arg(required = true)]
    pub uuids: Vec<String>,
}

/// Parses CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Runs the selected command with pre-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => cmd_run(args).await,
        Commands::Migrate(args) => cmd_migrate(args).await,
        Commands::Prioritize(args) => cmd_prioritize(args).await,
    }
}

/// Runs the scheduler.
async fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let store = PgJobStore::connect(&args.database_url).await?;

    if args.migrate {
        let runner = MigrationRunner::new(store.pool().clone());
        runner.run_migrations().await?;
    }

    let config = MonitorConfig::default()
        .with_standard_loop_delay(Duration::from_secs(args.standard_loop_delay))
        .with_priority_loop_delay(Duration::from_secs(args.priority_loop_delay))
        .with_cleanup_loop_delay(Duration::from_secs(args.cleanup_loop_delay))
        .with_processor_check_in_delay(Duration::from_secs(args.processor_check_in_delay));

    // Stand-in backend: real crash storage is provided by a backend
    // crate wired in at deployment. The scheduler's store-facing loops
    // (sweep, priority, cleanup) are fully functional either way.
    let crashes = Arc::new(MemoryCrashStorage::new());

    let token = CancellationToken::new();
    tokio::spawn(shutdown::handle_signals(token.clone()));

    let monitor = Arc::new(Monitor::new(Arc::new(store), crashes, config, token));
    monitor.run().await?;
    Ok(())
}

/// Applies (or resets and re-applies) the schema migrations.
async fn cmd_migrate(args: MigrateArgs) -> anyhow::Result<()> {
    let store = PgJobStore::connect(&args.database_url).await?;
    let runner = MigrationRunner::new(store.pool().clone());

    if args.reset {
        warn!("Resetting database: all job and processor data will be lost");
        runner.reset_database().await?;
    }

    runner.run_migrations().await?;
    info!("Migrations complete");
    Ok(())
}

/// Queues priority requests for the given crash ids.
async fn cmd_prioritize(args: PrioritizeArgs) -> anyhow::Result<()> {
    let store = PgJobStore::connect(&args.database_url).await?;
    for uuid in &args.uuids {
        store.insert_priority_request(uuid).await?;
        info!(uuid = %uuid, "Priority request queued");
    }
    Ok(())
}
