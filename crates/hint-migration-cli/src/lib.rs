//! `hintmig`: trigger surface for migration, fix-up and validation jobs.
//!
//! Every command prints JSON on stdout. Logs go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use hint_migration_core::{
    parse_timestamp, DateRange, ErrorId, ErrorStore, JobId, JobStore, JobType, MigrationConfig,
    MigrationJob, DEFAULT_BATCH_SIZE,
};
use hint_migration_engine::MigrationOrchestrator;
use hint_migration_store_sqlite::{SqliteLegacyStore, SqliteMigrationStore};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Parser)]
#[command(name = "hintmig")]
#[command(about = "Hint store migration CLI")]
pub struct Cli {
    /// Relational store holding migrated hints, jobs and errors.
    #[arg(long, default_value = "./hints.sqlite3")]
    db: PathBuf,

    /// Legacy document store.
    #[arg(long, default_value = "./legacy_hints.sqlite3")]
    legacy_db: PathBuf,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Count source records that a migration over the range would visit.
    Count(RangeArgs),
    /// Run a migration job and wait for it to finish.
    Migrate(RangeArgs),
    /// Re-attempt the unresolved errors of an earlier job.
    Fix(FixArgs),
    /// Reconcile source and target over a range or a migration job's range.
    Validate(ValidateArgs),
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },
    Errors {
        #[command(subcommand)]
        command: ErrorsCommand,
    },
    Legacy {
        #[command(subcommand)]
        command: LegacyCommand,
    },
}

#[derive(Debug, Args)]
pub struct RangeArgs {
    /// Inclusive lower bound (RFC3339, or ISO-8601 without offset read as UTC).
    #[arg(long)]
    start: Option<String>,
    /// Inclusive upper bound.
    #[arg(long)]
    end: Option<String>,
}

#[derive(Debug, Args)]
pub struct FixArgs {
    #[arg(long)]
    job: String,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Migration job whose range should be validated.
    #[arg(long, conflicts_with_all = ["start", "end"])]
    job: Option<String>,
    #[command(flatten)]
    range: RangeArgs,
}

#[derive(Debug, Subcommand)]
pub enum JobsCommand {
    List,
    Show {
        #[arg(long)]
        id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum ErrorsCommand {
    List {
        #[arg(long)]
        job: Option<String>,
        #[arg(long)]
        unresolved: bool,
    },
    Show {
        #[arg(long)]
        id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum LegacyCommand {
    /// Load newline-delimited JSON documents into the legacy store.
    Import {
        #[arg(long)]
        jsonl: PathBuf,
    },
}

/// Installs the stderr log subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
    if let Err(err) = installed {
        tracing::debug!(error = %err, "keeping the already installed log subscriber");
    }
}

/// Executes one parsed command.
///
/// # Errors
/// Returns an error when a store cannot be opened, an argument is invalid, or
/// a lookup fails. Job failures are reported in the printed job, not here.
pub async fn run_cli(cli: Cli) -> Result<()> {
    let config = MigrationConfig::with_batch_size(cli.batch_size)?;

    match cli.command {
        Command::Legacy {
            command: LegacyCommand::Import { jsonl },
        } => {
            let legacy = open_legacy(&cli.legacy_db)?;
            let imported = legacy.import_jsonl(&jsonl)?;
            print_json(&json!({ "imported": imported }))
        }
        Command::Jobs { command } => {
            let store = open_store(&cli.db)?;
            match command {
                JobsCommand::List => print_json(&store.list_jobs()?),
                JobsCommand::Show { id } => {
                    let id = parse_job_id(&id)?;
                    let job = store
                        .find_job(id)?
                        .ok_or_else(|| anyhow!("job {id} not found"))?;
                    print_json(&job)
                }
            }
        }
        Command::Errors { command } => {
            let store = open_store(&cli.db)?;
            match command {
                ErrorsCommand::List { job, unresolved } => {
                    let job = job.as_deref().map(parse_job_id).transpose()?;
                    print_json(&store.list_errors(job, unresolved)?)
                }
                ErrorsCommand::Show { id } => {
                    let id = ErrorId::parse(&id)?;
                    let error = store
                        .find_error(id)?
                        .ok_or_else(|| anyhow!("error {id} not found"))?;
                    print_json(&error)
                }
            }
        }
        command => {
            let store = Arc::new(open_store(&cli.db)?);
            let legacy = Arc::new(open_legacy(&cli.legacy_db)?);
            let orchestrator =
                MigrationOrchestrator::new(legacy, store.clone(), store.clone(), store.clone(), config)?;
            run_job_command(&orchestrator, command).await
        }
    }
}

async fn run_job_command(orchestrator: &MigrationOrchestrator, command: Command) -> Result<()> {
    match command {
        Command::Count(args) => {
            let range = parse_range(&args)?;
            let count = orchestrator.count_source_records(range)?;
            print_json(&json!({ "count": count, "range": range }))
        }
        Command::Migrate(args) => {
            let range = parse_range(&args)?;
            let job = orchestrator.create_job(JobType::Migration, range, None)?;
            let id = orchestrator
                .start_migration(job)
                .await
                .context("migration task panicked")?;
            print_job(orchestrator, id)
        }
        Command::Fix(args) => {
            let old_job_id = parse_job_id(&args.job)?;
            orchestrator
                .find_job(old_job_id)?
                .ok_or_else(|| anyhow!("job {old_job_id} not found"))?;
            let job = orchestrator.create_job(JobType::Fixing, DateRange::unbounded(), Some(old_job_id))?;
            let id = job.id;
            orchestrator
                .fix_unresolved_errors(job, old_job_id)
                .await
                .context("fix task panicked")?;
            print_job(orchestrator, id)
        }
        Command::Validate(args) => {
            let job = match args.job.as_deref() {
                Some(parent) => orchestrator.create_validation_for(parse_job_id(parent)?)?,
                None => {
                    let range = parse_range(&args.range)?;
                    orchestrator.create_job(JobType::Validation, range, None)?
                }
            };
            let id = job.id;
            orchestrator
                .start_validation(job)
                .await
                .context("validation task panicked")?;
            print_job(orchestrator, id)
        }
        Command::Jobs { .. } | Command::Errors { .. } | Command::Legacy { .. } => {
            Err(anyhow!("command does not start a job"))
        }
    }
}

fn open_store(path: &Path) -> Result<SqliteMigrationStore> {
    let store = SqliteMigrationStore::open(path)?;
    store.migrate()?;
    Ok(store)
}

fn open_legacy(path: &Path) -> Result<SqliteLegacyStore> {
    let store = SqliteLegacyStore::open(path)?;
    store.migrate()?;
    Ok(store)
}

fn parse_job_id(raw: &str) -> Result<JobId> {
    JobId::parse(raw).map_err(|err| anyhow!(err.to_string()))
}

fn parse_range(args: &RangeArgs) -> Result<DateRange> {
    let start = args.start.as_deref().map(parse_timestamp).transpose()?;
    let end = args.end.as_deref().map(parse_timestamp).transpose()?;
    Ok(DateRange::new(start, end)?)
}

fn print_job(orchestrator: &MigrationOrchestrator, id: JobId) -> Result<()> {
    let job: MigrationJob = orchestrator
        .find_job(id)?
        .ok_or_else(|| anyhow!("job {id} not found after run"))?;
    tracing::info!(
        job_id = %job.id,
        job_type = %job.job_type,
        state = %job.state,
        processed_items = job.processed_items,
        total_items = job.total_items,
        "job finished"
    );
    print_json(&job)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
