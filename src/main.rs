//! indexkeeper binary
//!
//! ```bash
//! indexkeeper run                       # keep indexes up to date until Ctrl-C
//! indexkeeper archive --index docs      # write docs.tar.gz now
//! indexkeeper clear --index docs
//! indexkeeper clear --index docs --suggestion   # only the suggestion index
//! indexkeeper check-config --config ./indexkeeper.toml
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use indexkeeper::archive::ArchiveOutcome;
use indexkeeper::fs_utils::default_config_path;
use indexkeeper::jobs::JobSummary;
use indexkeeper::{IndexController, IndexError, IndexerConfig};

/// Keeps full-text indexes in sync with their content sources
#[derive(Parser, Debug)]
#[command(name = "indexkeeper", version)]
struct Cli {
    /// Configuration file (default: <config dir>/indexkeeper/config.toml)
    #[arg(short, long, global = true, env = "INDEXKEEPER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the job queues and schedule update rounds until interrupted
    Run {
        /// Run a single update round, wait for it to drain, then exit
        #[arg(long)]
        once: bool,
    },
    /// Archive an index to <index>.tar.gz next to its directory
    Archive {
        #[arg(short, long)]
        index: String,
    },
    /// Rewrite an index segment
    Optimize {
        #[arg(short, long)]
        index: String,
    },
    /// Remove every document from an index
    Clear {
        #[arg(short, long)]
        index: String,
        /// Clear the index's suggestion index instead
        #[arg(long)]
        suggestion: bool,
    },
    /// Validate the configuration and print it with defaults filled in
    CheckConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<IndexError>()
                .map(IndexError::exit_code)
                .unwrap_or(ExitCode::FAILURE)
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let path = cli.config.unwrap_or_else(default_config_path);
    let config = IndexerConfig::load_from(&path)
        .with_context(|| format!("Loading configuration from {}", path.display()))?;
    init_tracing(&config.logging.level);

    match cli.command {
        Command::CheckConfig => {
            print!("{}", config.to_toml_string()?);
            tracing::info!("{} is valid", path.display());
            Ok(())
        }
        Command::Archive { index } => {
            let controller = IndexController::from_config(&config)?;
            let outcome = controller.archive(&index);
            controller.stop();
            match outcome? {
                ArchiveOutcome::Archived { path, bytes } => {
                    println!("{} ({} bytes)", path.display(), bytes)
                }
                ArchiveOutcome::InProgress => println!("Archiving of {} already in progress", index),
            }
            Ok(())
        }
        Command::Optimize { index } => {
            let controller = IndexController::from_config(&config)?;
            let job = controller.create_optimize_job(&index)?;
            job.run(&CancellationToken::new());
            controller.stop();
            println!("{}", serde_json::to_string_pretty(&JobSummary::of(job.as_ref()))?);
            Ok(())
        }
        Command::Clear { index, suggestion } => {
            let controller = IndexController::from_config(&config)?;
            let job = if suggestion {
                controller.create_suggestion_clear_job(&index)?
            } else {
                controller.create_clear_job(&index)?
            };
            job.run(&CancellationToken::new());
            controller.stop();
            println!("{}", serde_json::to_string_pretty(&JobSummary::of(job.as_ref()))?);
            Ok(())
        }
        Command::Run { once } => {
            let interval = config.scheduler.update_interval;
            let controller = Arc::new(IndexController::from_config(&config)?);
            controller.start()?;

            let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
            let result = runtime.block_on(serve(controller.clone(), interval, once));

            let in_use = controller.stop();
            if in_use > 0 {
                tracing::warn!("{} index accessor(s) were busy at shutdown", in_use);
            }
            result
        }
    }
}

/// Schedule update rounds until Ctrl-C (or until the first round drained with `once`)
async fn serve(controller: Arc<IndexController>, interval: u64, once: bool) -> anyhow::Result<()> {
    let added = controller.create_all_update_jobs()?;
    tracing::info!("Scheduled {} update job(s)", added);

    if once {
        tokio::select! {
            _ = wait_until_idle(&controller) => tracing::info!("Update round finished"),
            _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
        }
        return Ok(());
    }

    if interval == 0 {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Interrupted, shutting down");
        return Ok(());
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(interval));
    // The first tick completes immediately; the round above already ran
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let added = controller.create_all_update_jobs()?;
                tracing::info!("Scheduled {} update job(s)", added);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                return Ok(());
            }
        }
    }
}

/// Wait until no queue has pending or running jobs on two consecutive checks
async fn wait_until_idle(controller: &IndexController) {
    let mut idle_checks = 0;
    while idle_checks < 2 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let busy = controller.index_names().iter().any(|name| {
            controller
                .queue(name)
                .map(|queue| queue.size() > 0 || queue.current_job().is_some())
                .unwrap_or(false)
        });
        idle_checks = if busy { 0 } else { idle_checks + 1 };
    }
}
