//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Request;
use axum::{Json, Router};
use tokio::net::TcpListener;

use healthzd::aggregate::Aggregator;
use healthzd::check::backend::StaticBackend;
use healthzd::check::Catalog;
use healthzd::config::Config;
use healthzd::http::{AppState, HttpServer};
use healthzd::lifecycle::Shutdown;
use healthzd::remote::OverrideCache;

/// Boot a full daemon (static service backend) on an ephemeral port.
pub async fn spawn_daemon(cfg: Config) -> (SocketAddr, Shutdown, OverrideCache) {
    let overrides = OverrideCache::new();
    let catalog =
        Arc::new(Catalog::from_config(&cfg, Arc::new(StaticBackend::running())).unwrap());
    let aggregator = Arc::new(Aggregator::new(
        catalog.clone(),
        overrides.clone(),
        cfg.maintenance_file.clone(),
    ));
    let state = AppState {
        catalog,
        overrides: overrides.clone(),
        aggregator,
    };

    let server = HttpServer::new(state, &cfg.proxies).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        server.run(listener, signal).await.unwrap();
    });

    (addr, shutdown, overrides)
}

/// Start an upstream that echoes the request it saw, for passthrough tests.
#[allow(dead_code)]
pub async fn start_upstream() -> SocketAddr {
    let app = Router::new().fallback(|request: Request| async move {
        let forwarded_host = request
            .headers()
            .get("x-forwarded-host")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();
        Json(serde_json::json!({
            "path": request.uri().path(),
            "query": request.uri().query().unwrap_or(""),
            "forwarded_host": forwarded_host,
        }))
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
