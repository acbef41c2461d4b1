//! tracequeue command line.
//!
//! Operates on the batch directory of a pipeline that is not running:
//! - Submitting events from arguments or stdin
//! - Inspecting and changing consent
//! - Store status, flushing, pruning expired batches
//! - Running upload ticks against the configured endpoint
//! - Showing and validating configuration

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tq_common::{ConsentState, Error, SCHEMA_VERSION};
use tq_config::{load_config, PipelineConfig, ResolvedConfig};
use tq_core::conditions::{ConditionsProvider, StaticConditions, SysfsConditions};
use tq_core::exit_codes::ExitCode;
use tq_core::log_event;
use tq_core::logging::{
    event_names, generate_run_id, get_host_id, init_logging, LogConfig, LogContext, LogFormat,
    LogLevel, Stage,
};
use tq_core::scheduler::{Blocked, TickReport};
use tq_core::Pipeline;
use tq_store::{AppendOutcome, EventRecord};

/// Local span/event batching and delivery
#[derive(Parser)]
#[command(name = "tq-core")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to tracequeue.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the batch directory
    #[arg(long, global = true, env = "TRACEQUEUE_DIR")]
    dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Diagnostic output format on stderr (human, jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Append events (arguments, or one per stdin line)
    Submit(SubmitArgs),

    /// Inspect or change consent
    #[command(subcommand)]
    Consent(ConsentCommands),

    /// Show batch store status
    Status,

    /// Close the open batch so it becomes uploadable
    Flush,

    /// Delete batches older than the retention age
    Prune,

    /// Run upload ticks against the configured endpoint
    Upload(UploadArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Args, Debug)]
struct SubmitArgs {
    /// Event payloads; read from stdin when empty
    payloads: Vec<String>,

    /// Close the open batch afterwards
    #[arg(long)]
    flush: bool,
}

#[derive(Subcommand, Debug)]
enum ConsentCommands {
    /// Print the current consent state
    Get,
    /// Set consent (pending, granted, not_granted)
    Set { state: ConsentState },
}

#[derive(Args, Debug)]
struct UploadArgs {
    /// Number of ticks to run; waits out backoff delays in between
    #[arg(long, default_value_t = 1)]
    ticks: u32,

    /// Run the scheduler until interrupted (Ctrl-C or SIGTERM)
    #[arg(long, conflicts_with = "ticks")]
    follow: bool,

    /// Close the open batch before uploading
    #[arg(long)]
    flush: bool,

    /// Treat the network as reachable and the device as on mains
    #[arg(long)]
    ignore_conditions: bool,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Validate the configuration and report problems
    Validate,
}

fn main() {
    let cli = Cli::parse();

    let cli_level = if cli.global.quiet {
        Some(LogLevel::Error)
    } else {
        match cli.global.verbose {
            0 => None,
            1 => Some(LogLevel::Debug),
            _ => Some(LogLevel::Trace),
        }
    };
    init_logging(&LogConfig::from_env(cli_level, cli.global.log_format));

    let exit_code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {}", e.headline(), e);
            ExitCode::from(&e)
        }
    };

    std::process::exit(exit_code.as_i32());
}

fn run(cli: &Cli) -> Result<ExitCode, Error> {
    if let Commands::Config(ConfigCommands::Validate) = &cli.command {
        return run_config_validate(&cli.global);
    }

    let resolved = resolve(&cli.global)?;
    let ctx = LogContext::new(generate_run_id(), get_host_id());
    log_event!(
        ctx,
        DEBUG,
        event_names::CONFIG_LOADED,
        Stage::Init,
        format!("Using configuration from {}", resolved.source)
    );

    match &cli.command {
        Commands::Submit(args) => run_submit(resolved.config, args),
        Commands::Consent(cmd) => run_consent(resolved.config, cmd),
        Commands::Status => run_status(resolved.config),
        Commands::Flush => run_flush(resolved.config),
        Commands::Prune => run_prune(resolved.config),
        Commands::Upload(args) => run_upload(resolved.config, args),
        Commands::Config(_) => run_config_show(&resolved),
    }
}

fn resolve(global: &GlobalOpts) -> Result<ResolvedConfig, Error> {
    let mut resolved = load_config(global.config.as_deref())?;
    if let Some(dir) = &global.dir {
        resolved.config.storage.dir = Some(dir.clone());
    }
    Ok(resolved)
}

fn open_pipeline(
    config: PipelineConfig,
    conditions: Arc<dyn ConditionsProvider>,
) -> Result<Pipeline, Error> {
    #[cfg(feature = "http")]
    {
        Pipeline::open(
            config,
            Arc::new(tq_core::uploader::UreqTransport::new()),
            conditions,
        )
    }
    #[cfg(not(feature = "http"))]
    {
        let _ = (config, conditions);
        Err(Error::Transport(
            "built without the http feature; no transport available".to_string(),
        ))
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

#[derive(Serialize, Default)]
struct SubmitSummary {
    persisted: u64,
    discarded_no_consent: u64,
    dropped: u64,
    flushed: Option<String>,
}

fn run_submit(config: PipelineConfig, args: &SubmitArgs) -> Result<ExitCode, Error> {
    let pipeline = open_pipeline(config, Arc::new(StaticConditions::always()))?;

    let payloads: Vec<String> = if args.payloads.is_empty() {
        std::io::stdin()
            .lock()
            .lines()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|line| !line.trim().is_empty())
            .collect()
    } else {
        args.payloads.clone()
    };

    let mut summary = SubmitSummary::default();
    for payload in payloads {
        match pipeline.submit(EventRecord::new(payload.into_bytes())) {
            AppendOutcome::Persisted { .. } => summary.persisted += 1,
            AppendOutcome::DiscardedNoConsent => summary.discarded_no_consent += 1,
            AppendOutcome::DroppedOverCapacity { .. } | AppendOutcome::DroppedDurability => {
                summary.dropped += 1
            }
        }
    }
    if args.flush {
        summary.flushed = pipeline.store().flush()?.map(|id| id.to_string());
    }

    print_json(&summary)?;
    Ok(if summary.dropped > 0 {
        ExitCode::PartialFail
    } else {
        ExitCode::Clean
    })
}

fn run_consent(config: PipelineConfig, cmd: &ConsentCommands) -> Result<ExitCode, Error> {
    let pipeline = open_pipeline(config, Arc::new(StaticConditions::always()))?;
    match cmd {
        ConsentCommands::Get => {
            print_json(&serde_json::json!({ "consent": pipeline.consent() }))?;
        }
        ConsentCommands::Set { state } => {
            let purged = pipeline.set_consent(*state)?;
            print_json(&serde_json::json!({
                "consent": pipeline.consent(),
                "purged_batches": purged.len(),
                "purged_bytes": purged.iter().map(|e| e.size_bytes).sum::<u64>(),
            }))?;
        }
    }
    Ok(ExitCode::Clean)
}

fn run_status(config: PipelineConfig) -> Result<ExitCode, Error> {
    let pipeline = open_pipeline(config, Arc::new(StaticConditions::always()))?;
    let status = pipeline.status()?;
    let pending = status.closed_batches > 0 || status.open_batch.is_some();
    print_json(&serde_json::json!({
        "schema_version": SCHEMA_VERSION,
        "generated_at": Utc::now().to_rfc3339(),
        "consent": pipeline.consent(),
        "store": status,
    }))?;
    Ok(if pending {
        ExitCode::Pending
    } else {
        ExitCode::Clean
    })
}

fn run_flush(config: PipelineConfig) -> Result<ExitCode, Error> {
    let pipeline = open_pipeline(config, Arc::new(StaticConditions::always()))?;
    let closed = pipeline.store().flush()?;
    print_json(&serde_json::json!({
        "closed": closed.map(|id| id.to_string()),
        "pending_batches": pipeline.store().pending_ids()?.len(),
    }))?;
    Ok(ExitCode::Clean)
}

fn run_prune(config: PipelineConfig) -> Result<ExitCode, Error> {
    let max_age = config.storage.max_retention_age();
    let pipeline = open_pipeline(config, Arc::new(StaticConditions::always()))?;
    let evicted = pipeline.store().evict_expired(Utc::now(), max_age)?;
    print_json(&serde_json::json!({ "evicted": evicted }))?;
    Ok(ExitCode::Clean)
}

/// Granularity of interrupt checks while waiting.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Slack added to backoff waits so the batch is due when the tick runs.
const WAIT_MARGIN: Duration = Duration::from_millis(20);

/// Raise the returned flag on SIGINT or SIGTERM instead of exiting.
fn interrupt_flag() -> Result<Arc<AtomicBool>, Error> {
    let flag = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&flag))?;
    }
    Ok(flag)
}

/// Sleep for `delay`, returning early when `interrupted` is raised.
fn wait(delay: Duration, interrupted: &AtomicBool) {
    let deadline = Instant::now() + delay;
    while !interrupted.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(WAIT_SLICE.min(deadline - now));
    }
}

fn run_upload(config: PipelineConfig, args: &UploadArgs) -> Result<ExitCode, Error> {
    let interrupted = interrupt_flag()?;
    let conditions: Arc<dyn ConditionsProvider> = if args.ignore_conditions {
        Arc::new(StaticConditions::always())
    } else {
        Arc::new(SysfsConditions::new())
    };
    let pipeline = open_pipeline(config, conditions)?;
    if args.flush {
        pipeline.store().flush()?;
    }

    if args.follow {
        return run_upload_follow(&pipeline, &interrupted);
    }

    let mut reports: Vec<TickReport> = Vec::new();
    for tick in 0..args.ticks.max(1) {
        if tick > 0 {
            let delay = pipeline.scheduler().next_tick_delay(Utc::now())?;
            wait(delay + WAIT_MARGIN, &interrupted);
        }
        if interrupted.load(Ordering::Acquire) {
            break;
        }
        let report = pipeline.tick()?;
        let done = report.pending == 0 || report.blocked.is_some();
        reports.push(report);
        if done {
            break;
        }
    }

    print_json(&serde_json::json!({
        "ticks": reports,
        "stats": pipeline.scheduler().stats()?,
    }))?;

    let Some(last) = reports.last() else {
        return Ok(ExitCode::Pending);
    };
    Ok(match (&last.blocked, last.pending) {
        (Some(Blocked::Consent { .. }), _) => ExitCode::ConsentBlocked,
        (_, 0) if reports.iter().any(|r| r.rejected > 0) => ExitCode::PartialFail,
        (_, 0) => ExitCode::Clean,
        (None, _) if last.last_failure.is_some() => {
            let failure = last.last_failure.as_ref().map(Error::from);
            if let Some(e) = failure {
                eprintln!("{}: {}", e.headline(), e);
            }
            ExitCode::TransportError
        }
        _ => ExitCode::Pending,
    })
}

/// Background scheduler until interrupted, then a clean shutdown.
fn run_upload_follow(pipeline: &Pipeline, interrupted: &AtomicBool) -> Result<ExitCode, Error> {
    pipeline.spawn_scheduler()?;
    while !interrupted.load(Ordering::Acquire) {
        thread::sleep(WAIT_SLICE);
    }
    pipeline.shutdown()?;

    let status = pipeline.status()?;
    let pending = status.closed_batches > 0;
    print_json(&serde_json::json!({
        "stats": pipeline.scheduler().stats()?,
        "store": status,
    }))?;
    Ok(if pending {
        ExitCode::Pending
    } else {
        ExitCode::Clean
    })
}

fn run_config_show(resolved: &ResolvedConfig) -> Result<ExitCode, Error> {
    print_json(resolved)?;
    Ok(ExitCode::Clean)
}

/// Load errors are the report here, not a failure of the command.
fn run_config_validate(global: &GlobalOpts) -> Result<ExitCode, Error> {
    match resolve(global) {
        Ok(resolved) => {
            print_json(&serde_json::json!({
                "valid": true,
                "source": resolved.source.to_string(),
                "path": resolved.path,
            }))?;
            Ok(ExitCode::Clean)
        }
        Err(e) => {
            print_json(&serde_json::json!({
                "valid": false,
                "code": e.code(),
                "error": e.to_string(),
            }))?;
            Ok(ExitCode::ConfigError)
        }
    }
}
