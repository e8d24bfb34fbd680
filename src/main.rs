use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};

use ferry::config::Config;
use ferry::core::{load_tasks, TaskStatus};
use ferry::orchestration::{CommandExecutor, Dispatcher, RunSummary};
use ferry::status::{read_snapshot, CsvSnapshot, StatusBar};
use ferry::{flog, flog_warn, Error, Result};

/// ferry - run repository migrations in parallel, with a live status snapshot
#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    FERRY_DEBUG=1   Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to <log-dir>/ferry.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Settings shared by commands that read a task source.
#[derive(clap::Args, Debug, Clone, PartialEq, Default)]
pub struct RunArgs {
    /// CSV file listing the repositories to migrate
    #[arg(short, long)]
    pub input: PathBuf,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum migrations running at once (1-5)
    #[arg(short = 'j', long)]
    pub max_concurrent: Option<usize>,

    /// Directory for per-task logs and ferry.log
    #[arg(long)]
    pub log_dir: Option<String>,

    /// Seconds between polls when nothing changed
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Kill a migration after this many seconds
    #[arg(long)]
    pub task_timeout: Option<u64>,

    /// Stop the whole run after this many seconds
    #[arg(long)]
    pub run_timeout: Option<u64>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run every migration in the task source
    Run {
        #[command(flatten)]
        args: RunArgs,

        /// Status snapshot CSV, rewritten after every change
        #[arg(short, long)]
        output: PathBuf,

        /// Print the final summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check the task source and configuration without running anything
    Validate {
        #[command(flatten)]
        args: RunArgs,
    },

    /// Summarize a status snapshot
    Status {
        /// Snapshot CSV written by `ferry run`
        #[arg(short, long)]
        snapshot: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = dispatch(cli) {
        eprintln!("error: {}", e);
        std::process::exit(if e.is_config() { 2 } else { 1 });
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run { args, output, json } => run_batch(&args, &output, json, cli.debug),
        Command::Validate { args } => run_validate(&args, cli.debug),
        Command::Status { snapshot } => {
            ferry::log::init(None, cli.debug);
            run_status(&snapshot)
        }
    }
}

/// Load the named config file (or defaults) and apply flag overrides.
fn resolve_config(args: &RunArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(n) = args.max_concurrent {
        config.max_concurrent = n;
    }
    if let Some(dir) = &args.log_dir {
        config.log_dir = dir.clone();
    }
    if let Some(secs) = args.poll_interval {
        config.poll_interval_secs = secs;
    }
    if args.task_timeout.is_some() {
        config.task_timeout_secs = args.task_timeout;
    }
    if args.run_timeout.is_some() {
        config.run_timeout_secs = args.run_timeout;
    }
    Ok(config)
}

fn warn_if_program_missing(config: &Config) {
    if which::which(&config.executor.program).is_err() {
        let msg = format!(
            "executor program '{}' not found on PATH; every task will fail to launch",
            config.executor.program
        );
        flog_warn!("{}", msg);
        eprintln!("warning: {}", msg);
    }
}

fn run_batch(args: &RunArgs, output: &Path, json: bool, debug: bool) -> Result<()> {
    let config = resolve_config(args)?;
    ferry::log::init(Some(config.log_dir()), debug);
    flog!(
        "Run command: input={}, output={}, config={:?}",
        args.input.display(),
        output.display(),
        args.config
    );

    // Everything that can be a configuration error is checked before the
    // dispatcher starts its first task.
    let settings = config.settings()?;
    let tasks = load_tasks(&args.input)?;
    warn_if_program_missing(&config);

    let executor = Arc::new(CommandExecutor::new(config.executor.clone()));
    let sink = Arc::new(CsvSnapshot::new(output));
    let mut dispatcher = Dispatcher::new(settings, executor, sink)
        .with_classifier(config.classifier())
        .with_status_bar(StatusBar::stdout());

    let rt = tokio::runtime::Runtime::new()?;
    let started = Instant::now();
    let summary = rt.block_on(async {
        let cancel = dispatcher.cancel_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                flog_warn!("Interrupt received, cancelling run");
                cancel.cancel();
            }
        });
        dispatcher.run(tasks).await
    })?;

    print_summary(&summary, output, started, json)
}

fn print_summary(summary: &RunSummary, output: &Path, started: Instant, json: bool) -> Result<()> {
    if json {
        let json_output = serde_json::json!({
            "total": summary.total,
            "success": summary.success,
            "failure": summary.failure,
            "snapshot": output.display().to_string(),
            "diagnostic_log": ferry::log::log_path().map(|p| p.display().to_string()),
            "elapsed_secs": started.elapsed().as_secs(),
        });
        println!("{}", serde_json::to_string_pretty(&json_output)?);
        return Ok(());
    }

    println!();
    println!("Migration run complete");
    println!("  Total:    {}", summary.total);
    println!("  Success:  {}", summary.success);
    println!("  Failure:  {}", summary.failure);
    println!("  Elapsed:  {}s", started.elapsed().as_secs());
    println!("  Snapshot: {}", output.display());
    if let Some(path) = ferry::log::log_path() {
        println!("  Log:      {}", path.display());
    }
    Ok(())
}

fn run_validate(args: &RunArgs, debug: bool) -> Result<()> {
    ferry::log::init(None, debug);
    let config = resolve_config(args)?;
    let settings = config.settings()?;
    let tasks = load_tasks(&args.input)?;
    warn_if_program_missing(&config);

    println!(
        "{} tasks OK, max_concurrent={}, logs in {}",
        tasks.len(),
        settings.max_concurrent.get(),
        settings.log_dir.display()
    );
    Ok(())
}

fn run_status(snapshot: &Path) -> Result<()> {
    let records = read_snapshot(snapshot)?;
    if records.is_empty() {
        return Err(Error::Config(format!(
            "snapshot {} has no rows",
            snapshot.display()
        )));
    }

    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for record in &records {
        *counts.entry(record.status().as_str()).or_default() += 1;
    }
    println!("{} tasks in {}", records.len(), snapshot.display());
    for (status, n) in &counts {
        println!("  {:<8} {}", status, n);
    }

    let failed: Vec<_> = records
        .iter()
        .filter(|r| r.status() == TaskStatus::Failure)
        .collect();
    if !failed.is_empty() {
        println!();
        println!("Failed:");
        for record in failed {
            println!(
                "  {} -> {}/{}  {}",
                record.identity.label(),
                record.identity.target_org,
                record.identity.target_repo,
                record
                    .log_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            );
        }
    }
    Ok(())
}
