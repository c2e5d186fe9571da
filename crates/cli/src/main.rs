//! picalc CLI - pi to arbitrary precision with progress and time estimates.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use picalc_core::{Algorithm, PrecisionRequest, TaskState};
use picalc_progress::{DurationEstimator, EstimatorConfig};
use picalc_series::format_decimal;
use picalc_storage::JsonStorage;
use picalc_work::{ManagerConfig, TaskManager, TaskService};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "picalc")]
#[command(about = "Compute digits of pi with live progress", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding estimator state
    #[arg(long, global = true, default_value = ".picalc")]
    state_dir: PathBuf,

    /// Concurrent evaluations (defaults to the number of CPUs)
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the first N digits of pi
    Compute {
        /// Number of digits
        #[arg(allow_hyphen_values = true)]
        n: i64,
        /// Series to evaluate
        #[arg(long, default_value = "chudnovsky")]
        algorithm: String,
        /// Print the final snapshot as JSON instead of the digits
        #[arg(long)]
        json: bool,
        /// Do not draw the progress line
        #[arg(short, long)]
        quiet: bool,
    },
    /// Predict how long N digits will take
    Estimate {
        /// Number of digits
        n: u64,
    },
    /// Refit the duration model from recorded samples
    Refit,
    /// Show the current duration model and samples
    Params,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    // Digits go to stdout, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_estimator(state_dir: &Path) -> Result<DurationEstimator> {
    let storage = JsonStorage::new(state_dir)
        .await
        .with_context(|| format!("opening state directory {}", state_dir.display()))?;
    debug!("Estimator state in {}", storage.root().display());
    Ok(DurationEstimator::load(Arc::new(storage), EstimatorConfig::default()).await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = ManagerConfig::default().with_state_dir(&cli.state_dir);
    if let Some(workers) = cli.workers {
        config = config.with_workers(workers);
    }

    match cli.command {
        Commands::Compute {
            n,
            algorithm,
            json,
            quiet,
        } => {
            let algorithm: Algorithm = algorithm.parse()?;
            let manager = TaskManager::open(config).await?;
            let receipt = manager
                .submit(PrecisionRequest::new(n).with_algorithm(algorithm))
                .await?;
            info!(
                "Computing {} digits as task {} (estimated {:.2}s)",
                n, receipt.task_id, receipt.estimated_seconds
            );

            let snapshot = loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        warn!("Interrupted, cancelling task {}", receipt.task_id);
                        manager.cancel(&receipt.task_id).await?;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(200)) => {}
                }

                let snapshot = manager.poll(&receipt.task_id).await?;
                if !quiet {
                    eprint!(
                        "\r{:>6.2}% {:>8.2}s elapsed {:>8.2}s left",
                        snapshot.progress * 100.0,
                        snapshot.elapsed_time,
                        snapshot.eta
                    );
                    std::io::stderr().flush().ok();
                }
                if snapshot.state.is_terminal() {
                    if !quiet {
                        eprintln!();
                    }
                    break snapshot;
                }
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
                return Ok(());
            }

            match snapshot.state {
                TaskState::Finished => {
                    let digits = snapshot.result.unwrap_or_default();
                    println!("{}", format_decimal(&digits));
                    info!("Done in {:.3}s", snapshot.elapsed_time);
                }
                TaskState::Cancelled => anyhow::bail!("task {} was cancelled", receipt.task_id),
                _ => anyhow::bail!(
                    "task {} failed: {}",
                    receipt.task_id,
                    snapshot.error.unwrap_or_default()
                ),
            }
        }
        Commands::Estimate { n } => {
            let manager = TaskManager::open(config).await?;
            let seconds = manager.estimate(n).await;
            println!("{} digits: ~{:.3}s", n, seconds);
        }
        Commands::Refit => {
            let estimator = open_estimator(&cli.state_dir).await?;
            let params = estimator.refit().await?;
            println!(
                "Fitted duration = exp({:.6}) * n^{:.6} from {} sample(s)",
                params.a, params.b, params.sample_count
            );
        }
        Commands::Params => {
            let estimator = open_estimator(&cli.state_dir).await?;
            match estimator.params().await {
                Some(params) => println!(
                    "duration = exp({:.6}) * n^{:.6} (fitted {}, {} sample(s))",
                    params.a, params.b, params.fitted_at, params.sample_count
                ),
                None => println!("No fitted model; using defaults"),
            }

            let samples = estimator.samples().await;
            println!("Samples ({})", samples.len());
            for sample in samples {
                println!(
                    "  n={:<10} mean={:.6}s count={}",
                    sample.n, sample.mean_duration, sample.count
                );
            }
        }
    }

    Ok(())
}
