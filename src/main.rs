//! Historian Server
//!
//! Run with: cargo run -- --config historian.toml
//!
//! # Configuration
//!
//! Settings come from the config file (or the default locations), then from
//! environment variables:
//! - `HOST`, `PORT`: Bind address (default: 0.0.0.0:8080)
//! - `BAG_DIR`: Directory of recorded `.mcap` logs (default: ./bags)
//! - `MAX_RANGE_HOURS`: Widest accepted range query (default: 24)
//! - `POOL_SIZE`: Query worker threads (default: CPUs - 1)
//! - `WORKER_TIMEOUT_MS`: Per-query timeout (default: 30000)
//! - `LIVE_THROTTLE_HZ`: Live batch rate cap (default: 10)
//! - `DDS_DOMAIN`: Message bus domain (default: 0)
//! - `MAX_SOCKETS`: Concurrent live sockets (default: 128)
//! - `LOG_LEVEL`, `LOG_FORMAT`: Logging (default: info, pretty)
//! - `RUST_LOG`: Overrides `LOG_LEVEL` with a full filter

use anyhow::Context;
use clap::Parser;
use historian::api::{serve, ApiConfig, AppState};
use historian::bus::{BusClient, LocalBus, MessageBus};
use historian::catalog::FileCatalog;
use historian::config::{generate_default_config, Config, LoggingConfig};
use historian::live::LiveRegistry;
use historian::workers::WorkerPool;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "historian")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Range queries and live streams over recorded robot telemetry")]
struct Args {
    /// Config file (TOML); default locations are searched when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on, overrides config and PORT
    #[arg(short, long)]
    port: Option<u16>,

    /// Log directory, overrides config and BAG_DIR
    #[arg(long)]
    bag_dir: Option<PathBuf>,

    /// Print a default config file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(dir) = &args.bag_dir {
        config.catalog.bag_dir = dir.display().to_string();
    }

    init_logging(&config.logging);

    tracing::info!("Starting Historian v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bag_dir = %config.catalog.bag_dir,
        throttle_hz = config.live.throttle_hz,
        max_range_hours = config.query.max_range_hours,
        "Configuration loaded"
    );

    // Message bus, connected on first use
    let domain = config.live.dds_domain;
    let bus: Arc<dyn MessageBus> = Arc::new(BusClient::new(move || async move {
        tracing::info!(domain, "Joining message bus domain");
        Ok(Arc::new(LocalBus::new(domain)) as Arc<dyn MessageBus>)
    }));

    let catalog = Arc::new(FileCatalog::start(config.catalog.catalog_config()).await);
    tracing::info!(
        dir = %catalog.dir().display(),
        files = catalog.files().len(),
        "File catalog ready"
    );

    let pool = WorkerPool::start(config.query.pool_config());
    tracing::info!(workers = pool.size(), "Worker pool ready");

    let live = LiveRegistry::start(Arc::clone(&bus), config.live.live_config());

    let api_config = ApiConfig::from_config(&config);
    let state = AppState::new(
        Arc::clone(&catalog),
        pool.clone(),
        live.clone(),
        bus,
        api_config.clone(),
    );

    serve(state, &api_config).await.context("API server failed")?;

    tracing::info!("Shutting down...");
    live.shutdown();
    pool.drain().await;
    catalog.stop();

    tracing::info!("Historian shutdown complete");
    Ok(())
}

/// RUST_LOG wins over the configured level
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
