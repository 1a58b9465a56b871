use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use robobak::cli::TerminalPrompt;
use robobak::config::AppConfig;
use robobak::context::AppContext;
use robobak::core::models::normalize_address;
use robobak::core::{BackupJob, Category, Credentials, Orchestrator};
use robobak::logging::{self, LogConfig};
use robobak::store::JobStore;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Parser)]
#[command(name = "robobak")]
#[command(about = "Parallel FTP backup of robot controllers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (defaults to robobak.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up every robot of a saved job
    Run(RunArgs),
    /// Manage saved jobs
    #[command(subcommand)]
    Jobs(JobCommands),
}

#[derive(Args)]
struct RunArgs {
    job: String,

    /// Never ask before restarting a dropped transfer
    #[arg(long)]
    headless: bool,
}

#[derive(Subcommand)]
enum JobCommands {
    List,
    Show { job: String },
    Add(AddArgs),
    Remove { job: String },
}

#[derive(Args)]
struct AddArgs {
    job: String,

    /// Existing directory that receives the job's backups
    #[arg(long)]
    folder: PathBuf,

    /// Robot addresses; a bare number is expanded with the subnet prefix
    #[arg(long, num_args = 1.., required = true)]
    ips: Vec<String>,

    /// Robot numbers, one per address
    #[arg(long, num_args = 1.., required = true)]
    nums: Vec<String>,

    #[arg(long = "type", value_enum)]
    category: Category,

    #[arg(long, requires = "password")]
    username: Option<String>,

    #[arg(long, requires = "username")]
    password: Option<String>,
}

/// CLI flags layered over the settings file; unset flags leave it alone.
#[derive(Serialize)]
struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    verbose: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    log_json: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    headless: Option<bool>,
}

impl Overrides {
    fn from_cli(cli: &Cli) -> Self {
        let headless = match &cli.command {
            Commands::Run(args) => args.headless,
            Commands::Jobs(_) => false,
        };
        Self {
            verbose: cli.verbose.then_some(true),
            log_json: cli.log_json.then_some(true),
            headless: headless.then_some(true),
        }
    }
}

fn main() -> ExitCode {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return ExitCode::from(2);
        }
    };
    let code = runtime.block_on(async {
        match run().await {
            Ok(code) => code,
            Err(e) => {
                eprintln!("Error: {e:#}");
                ExitCode::from(2)
            }
        }
    });
    // A retry prompt may still be blocked on stdin after Ctrl-C.
    runtime.shutdown_timeout(Duration::from_millis(100));
    code
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = AppConfig::new(cli.config.as_deref(), Some(&Overrides::from_cli(&cli)))?;
    logging::init(LogConfig {
        json: config.log_json,
        verbose: config.verbose,
    });

    match cli.command {
        Commands::Run(args) => run_backup(AppContext::new(config), &args.job).await,
        Commands::Jobs(command) => {
            manage_jobs(&config, command).context("Job store operation failed")?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_backup(ctx: AppContext, job_id: &str) -> Result<ExitCode> {
    let store = JobStore::new(&ctx.config.jobs_file);
    let Some(job) = store.load(job_id)? else {
        bail!(
            "job {job_id} not found in {} (add it with `robobak jobs add`)",
            store.path().display()
        );
    };

    println!("Loaded config for Job {job_id}:");
    for device in job.devices() {
        println!("    {} -> {}", device.label(), device.address);
    }
    println!("    Type: {}\n", job.category());

    let cancel = setup_signal_handler();
    let summary = Orchestrator::new(ctx, Arc::new(TerminalPrompt::new()))
        .with_cancellation(cancel)
        .run(job_id, &job)
        .await
        .context("Backup run failed")?;

    println!();
    print!("{}", summary.render());
    if summary.root_discarded {
        println!("Removed empty folder {}", summary.destination_root.display());
    } else {
        println!("Saved to {}", summary.destination_root.display());
    }

    Ok(if summary.all_failed() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn manage_jobs(config: &AppConfig, command: JobCommands) -> Result<()> {
    let store = JobStore::new(&config.jobs_file);
    match command {
        JobCommands::List => {
            let jobs = store.list()?;
            if jobs.is_empty() {
                println!("No saved jobs.");
            }
            for job in jobs {
                println!("Job {job}");
            }
        }
        JobCommands::Show { job: job_id } => {
            let Some(job) = store.load(&job_id)? else {
                bail!("job {job_id} not found");
            };
            println!("Job {job_id}");
            println!("    Folder: {}", job.folder().display());
            println!("    Type: {}", job.category());
            for device in job.devices() {
                println!("    {} -> {}", device.label(), device.address);
            }
        }
        JobCommands::Add(args) => {
            if !args.folder.is_dir() {
                bail!("backup folder {} does not exist", args.folder.display());
            }
            let ips = args
                .ips
                .iter()
                .map(|ip| normalize_address(ip, &config.subnet_prefix))
                .collect();
            let credentials = match (args.username, args.password) {
                (Some(username), Some(password)) => Some(Credentials { username, password }),
                _ => None,
            };
            let job = BackupJob::new(args.folder, args.category, ips, args.nums, credentials)?;
            store.save(&args.job, &job)?;
            println!("Saved job {}", args.job);
        }
        JobCommands::Remove { job } => {
            if store.remove(&job)? {
                println!("Job {job} deleted.");
            } else {
                bail!("job {job} not found");
            }
        }
    }
    Ok(())
}

/// Cancel running transfers on SIGINT or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    use tokio::signal::unix::{SignalKind, signal};

    let cancel = CancellationToken::new();
    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(signal = name, error = %e, "Failed to install signal handler");
                    return;
                }
            };
            stream.recv().await;
            eprintln!("\nReceived {name}. Stopping transfers...");
            token.cancel();
        });
    }
    cancel
}

#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl-C handler");
            return;
        }
        eprintln!("\nReceived Ctrl-C. Stopping transfers...");
        token.cancel();
    });
    cancel
}
