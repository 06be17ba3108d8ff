use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use pagesweep::config::SweepConfig;
use pagesweep::fetcher::HttpPageFetcher;
use pagesweep::health::HealthServer;
use pagesweep::pipeline::Pipeline;
use pagesweep::progress::{BarProgressSink, FanoutSink, LogProgressSink, ProgressBoard};
use pagesweep::report::write_outputs;
use pagesweep::source::{FileUnitSource, HttpUnitSource, UnitFilter, UnitSource};

/// Partitioned, bounded-concurrency extractor for large paginated listings
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Unit listing file (.json, .yaml); fetched from the remote source when omitted
    #[clap(short, long, env = "PAGESWEEP_UNITS_FILE")]
    units: Option<PathBuf>,

    /// Configuration file (.toml, .yaml, .json)
    #[clap(short, long, env = "PAGESWEEP_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Workers per unit in the main pass
    #[clap(short, long)]
    workers: Option<usize>,

    /// Workers per unit in the recovery pass
    #[clap(long)]
    recovery_workers: Option<usize>,

    /// Minimum per-worker timeout in minutes
    #[clap(long)]
    timeout_mins: Option<u64>,

    /// Only extract these units (comma separated)
    #[clap(long, value_delimiter = ',')]
    unit_ids: Vec<String>,

    /// Never extract these units (comma separated)
    #[clap(long, value_delimiter = ',')]
    skip_unit_ids: Vec<String>,

    /// Skip the recovery pass
    #[clap(long)]
    no_recovery: bool,

    #[clap(short, long)]
    output_dir: Option<PathBuf>,

    #[clap(long)]
    status_port: Option<u16>,

    /// Draw a terminal progress bar
    #[clap(long)]
    progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Supports: DEBUG, INFO, WARNING, ERROR, CRITICAL
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string());
    let filter = build_tracing_filter(&log_level);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(true)
        .json()
        .init();

    print_ascii_art();

    info!("🚀 Starting pagesweep");

    let config = match SweepConfig::load(args.config.as_deref()).and_then(|c| apply_args(c, &args).validated()) {
        Ok(c) => c,
        Err(e) => {
            error!("❌ Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    let shutdown = setup_shutdown_handler();
    let board = Arc::new(ProgressBoard::new());
    board.set_phase("loading");

    let server_shutdown = CancellationToken::new();
    let status_server = HealthServer::new(config.status_port, board.clone());
    let status_handle = tokio::spawn({
        let server_shutdown = server_shutdown.clone();
        async move {
            if let Err(e) = status_server.run(server_shutdown).await {
                error!("❌ Status server error: {}", e);
            }
        }
    });

    let result = run(&config, &args, board, shutdown).await;

    info!("🛑 Shutting down pagesweep...");
    server_shutdown.cancel();
    let _ = status_handle.await;

    match result {
        Ok(_) => {
            info!("✅ pagesweep finished");
            Ok(())
        }
        Err(e) => {
            error!("❌ pagesweep failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(config: &SweepConfig, args: &Args, board: Arc<ProgressBoard>, shutdown: CancellationToken) -> Result<()> {
    let page_timeout = Duration::from_secs(config.page_timeout_secs);

    let source: Box<dyn UnitSource> = match &args.units {
        Some(path) => Box::new(FileUnitSource::new(path, config.page_size)),
        None => Box::new(HttpUnitSource::new(&config.fetch_base_url, config.page_size, page_timeout)?),
    };
    let units = source.load_units().await.context("Failed to load units")?;
    let units = UnitFilter::new(&args.unit_ids, &args.skip_unit_ids).apply(units);
    if units.is_empty() {
        warn!("⚠️ No units to extract");
    }

    let fetcher = Arc::new(HttpPageFetcher::new(&config.fetch_base_url, config.field_map(), page_timeout)?);

    let bar = Arc::new(if args.progress { BarProgressSink::new(units.len()) } else { BarProgressSink::hidden() });
    let sink = FanoutSink::new().with(Arc::new(LogProgressSink)).with(board.clone()).with(bar.clone());

    let mut pipeline = Pipeline::new(fetcher, config.main_pass(), Arc::new(sink), shutdown).with_board(board);
    if config.recovery_enabled {
        pipeline = pipeline.with_recovery(config.recovery_pass());
    }

    let output = pipeline.run(&units).await;
    bar.finish();

    output.report.log_summary();
    write_outputs(&config.output_dir, &config.output_prefix, &output.records, &output.report).await?;
    Ok(())
}

/// Command-line flags win over file and environment settings
fn apply_args(mut config: SweepConfig, args: &Args) -> SweepConfig {
    if let Some(workers) = args.workers {
        config.main_workers_per_unit = workers;
    }
    if let Some(workers) = args.recovery_workers {
        config.recovery_workers_per_unit = workers;
    }
    if let Some(mins) = args.timeout_mins {
        config.min_worker_timeout_secs = mins * 60;
    }
    if args.no_recovery {
        config.recovery_enabled = false;
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(port) = args.status_port {
        config.status_port = port;
    }
    config
}

fn print_ascii_art() {
    println!(
        r#"
██████╗  █████╗  ██████╗ ███████╗███████╗██╗    ██╗███████╗███████╗██████╗
██╔══██╗██╔══██╗██╔════╝ ██╔════╝██╔════╝██║    ██║██╔════╝██╔════╝██╔══██╗
██████╔╝███████║██║  ███╗█████╗  ███████╗██║ █╗ ██║█████╗  █████╗  ██████╔╝
██╔═══╝ ██╔══██║██║   ██║██╔══╝  ╚════██║██║███╗██║██╔══╝  ██╔══╝  ██╔═══╝
██║     ██║  ██║╚██████╔╝███████╗███████║╚███╔███╔╝███████╗███████╗██║
╚═╝     ╚═╝  ╚═╝ ╚═════╝ ╚══════╝╚══════╝ ╚══╝╚══╝ ╚══════╝╚══════╝╚═╝
"#
    );
    println!();
}

fn setup_shutdown_handler() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();

    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        info!("🛑 Received shutdown signal, finishing current pages");
        token.cancel();
    });

    shutdown
}

/// Build tracing filter string from Python-style log level
fn build_tracing_filter(log_level: &str) -> String {
    let rust_level = match log_level.to_uppercase().as_str() {
        "DEBUG" => "debug",
        "INFO" => "info",
        "WARNING" | "WARN" => "warn",
        "ERROR" => "error",
        "CRITICAL" => "error",
        _ => "info",
    };
    format!("pagesweep={},reqwest={},hyper=warn", rust_level, rust_level)
}
