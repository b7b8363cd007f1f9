//! healthzd daemon entry point.
//!
//! Startup order: logging, configuration, override pollers, check catalog,
//! HTTP server. Configuration and bootstrap failures are fatal; everything
//! after bind is contained per check.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use healthzd::aggregate::Aggregator;
use healthzd::check::backend::platform_backend;
use healthzd::check::Catalog;
use healthzd::http::{AppState, HttpServer};
use healthzd::lifecycle::{self, Shutdown};
use healthzd::observability::logging;
use healthzd::remote::{OverrideCache, OverridePoller};

#[derive(Parser)]
#[command(name = "healthzd", version, about = "Health-check aggregation daemon")]
struct Cli {
    /// Path to the configuration file (defaults to healthzd.yml next to the
    /// binary).
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn default_config_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("healthzd.yml")))
        .unwrap_or_else(|| PathBuf::from("healthzd.yml"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let cfg = healthzd::config::load(&config_path)?;

    tracing::info!(
        config = %config_path.display(),
        commands = cfg.commands.len(),
        services = cfg.services.len(),
        requests = cfg.requests.len(),
        proxies = cfg.proxies.len(),
        "configuration loaded"
    );

    let shutdown = Shutdown::new();
    let overrides = OverrideCache::new();

    if !cfg.dns_records.is_empty() {
        let poller = OverridePoller::from_system_conf(overrides.clone())?;
        poller.spawn(cfg.dns_records.clone(), &shutdown);
    }

    let catalog = Arc::new(Catalog::from_config(&cfg, platform_backend())?);
    let aggregator = Arc::new(Aggregator::new(
        catalog.clone(),
        overrides.clone(),
        cfg.maintenance_file.clone(),
    ));

    let state = AppState {
        catalog,
        overrides,
        aggregator,
    };
    let server = HttpServer::new(state, &cfg.proxies)?;

    let listener = TcpListener::bind(cfg.bind_addr()).await?;
    tracing::info!(address = %listener.local_addr()?, "healthzd listening");

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            lifecycle::wait_for_signal().await;
            tracing::info!("shutdown signal received");
            shutdown.trigger();
        });
    }

    server.run(listener, shutdown).await?;

    tracing::info!("healthzd shutting down");
    Ok(())
}
