use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use caching_proxy::config::loader::{finalize, load_config};
use caching_proxy::lifecycle::{signals, Shutdown};
use caching_proxy::observability::{logging, metrics};
use caching_proxy::{ProxyConfig, ProxyServer};

/// How long in-flight connections may run after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "caching-proxy")]
#[command(about = "Caching HTTP forward proxy", long_about = None)]
struct Cli {
    /// Port number the proxy listens on
    port: u16,

    /// Optional TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cache root directory (overrides the config file)
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Missing or invalid port: clap prints usage and exits with status 2.
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    config.set_port(cli.port);
    if let Some(dir) = cli.cache_dir {
        config.cache.root = dir;
    }
    let config = finalize(config)?;

    logging::init_logging(&config.observability.log_level);
    tracing::info!("caching-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        cache_root = %config.cache.root.display(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        }
    }

    let server = ProxyServer::bind(&config).await?;
    let tracker = server.tracker();

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());
    server.run(shutdown.subscribe()).await;

    if !tracker.wait_idle(SHUTDOWN_GRACE).await {
        tracing::warn!(
            in_flight = tracker.active_count(),
            "Shutdown grace period elapsed with connections still open"
        );
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
