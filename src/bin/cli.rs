//! RhinoBox service entry point: a single process that opens the data
//! directory, initialises every component, and exposes the ingest
//! operations over a thin CLI (spec.md §6 — the HTTP router and auth are
//! external collaborators, not covered here).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use rhinobox::config::RhinoConfig;
use rhinobox::RhinoService;

#[derive(Parser)]
#[command(name = "rhinobox")]
#[command(about = "Content-addressed ingestion and storage service", long_about = None)]
struct Cli {
    /// Data directory root (overrides RHINOBOX_DATA_DIR / config file).
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the service and idle (liveness probe only; no network listener
    /// is opened here — that's the HTTP router's job).
    Serve,

    /// Store a single local file, bypassing the job queue.
    Store {
        path: PathBuf,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        mime: Option<String>,
    },

    /// Ingest a newline-delimited JSON file into a namespace.
    IngestJson {
        path: PathBuf,
        #[arg(long)]
        namespace: String,
    },

    /// Run the storage maintenance sweep.
    Verify {
        #[arg(long)]
        rehash: bool,
    },

    /// Print cache and job-queue stats.
    Stats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("rhinobox={log_level}")));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let data_dir = cli
        .data_dir
        .unwrap_or_else(|| PathBuf::from("./rhinobox-data"));
    let mut config = RhinoConfig::load(data_dir)?;
    if cli.verbose {
        config.log_level = "debug".to_string();
    }

    let service = RhinoService::open(config).await?;

    match cli.command {
        Commands::Serve => {
            println!("{}", style("rhinobox service ready").green().bold());
            println!("data dir: {}", service.config.data_dir.display());
            println!("healthy: {}", service.is_healthy());
        }
        Commands::Store { path, category, mime } => {
            let spinner = progress_spinner(&format!("storing {}", path.display()));
            let bytes = std::fs::read(&path)?;
            let filename = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("file")
                .to_string();
            let mime = mime.unwrap_or_else(|| "application/octet-stream".to_string());
            let outcome = service.storage.store_file(
                bytes.as_slice(),
                &filename,
                &mime,
                bytes.len() as u64,
                None,
                category.as_deref(),
            )?;
            spinner.finish_and_clear();
            if outcome.duplicate {
                println!("{} already stored as {}", style("duplicate").yellow(), outcome.record.hash);
            } else {
                println!("{} {} -> {}", style("stored").green(), outcome.record.hash, outcome.record.stored_path);
            }
        }
        Commands::IngestJson { path, namespace } => {
            let spinner = progress_spinner(&format!("analyzing {}", path.display()));
            let raw = std::fs::read_to_string(&path)?;
            let docs: Vec<String> = raw.lines().filter(|l| !l.trim().is_empty()).map(|l| l.to_string()).collect();
            let outcome = service.ingest_json(&namespace, docs).await?;
            spinner.finish_and_clear();
            println!(
                "{} engine={} table={} confidence={:.2}",
                style("decision").cyan().bold(),
                outcome.decision.engine,
                outcome.decision.table,
                outcome.decision.confidence
            );
            println!("batch written to {}", outcome.batch_path);
        }
        Commands::Verify { rehash } => {
            let spinner = progress_spinner("verifying store");
            let report = service.storage.verify_store(rehash)?;
            spinner.finish_and_clear();
            println!("records: {}", report.total_records);
            println!("missing: {}", report.missing_files.len());
            println!("orphans: {}", report.orphan_files.len());
            println!("hash mismatches: {}", report.hash_mismatches.len());
        }
        Commands::Stats => {
            let cache_stats = service.cache.stats();
            let job_stats = service.jobs.stats().await;
            println!(
                "cache: l1_hits={} l2_negative={} l3_hits={} misses={} hit_ratio={:.2} l1_size={}",
                cache_stats.l1_hits,
                cache_stats.l2_negative_hits,
                cache_stats.l3_hits,
                cache_stats.misses,
                cache_stats.hit_ratio,
                cache_stats.l1_size
            );
            println!(
                "jobs: total={} pending={} running={} completed={} partial={} failed={}",
                job_stats.total, job_stats.pending, job_stats.running, job_stats.completed, job_stats.partial, job_stats.failed
            );
        }
    }

    Ok(())
}

fn progress_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}
