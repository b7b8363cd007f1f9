//! HTTP server setup and handlers.
//!
//! # Responsibilities
//! - Create the Axum router: per-check endpoints, the aggregate root, and
//!   the configured reverse-proxy passthroughs
//! - Encode health in the response status (200 healthy, 503 otherwise)
//! - Serve with graceful shutdown and a bounded drain window
//!
//! Check endpoints call the same `Check::status()` the aggregator uses;
//! there is no separate evaluation path.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::aggregate::Aggregator;
use crate::check::{Catalog, CheckKind};
use crate::config::{ConfigError, ProxyConfig};
use crate::http::proxy;
use crate::lifecycle::Shutdown;
use crate::remote::OverrideCache;

/// How long open connections get to finish after the shutdown signal.
pub const DRAIN_WINDOW: Duration = Duration::from_secs(5);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub overrides: OverrideCache,
    pub aggregator: Arc<Aggregator>,
}

/// HTTP server for the daemon.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState, proxies: &[ProxyConfig]) -> Result<Self, ConfigError> {
        let router = Router::new()
            .route("/", get(global_handler))
            .route("/favicon.ico", get(favicon_handler))
            .route("/command/{name}", get(command_handler))
            .route("/service/{name}", get(service_handler))
            .route("/request/{name}", get(request_handler))
            .with_state(state);

        let router = proxy::mount(router, proxies)?;

        Ok(Self {
            router: router.layer(TraceLayer::new_for_http()),
        })
    }

    /// Run the server until the shutdown signal fires, then allow open
    /// connections [`DRAIN_WINDOW`] to finish.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let mut graceful = shutdown.subscribe();
        let mut drain = shutdown.subscribe();

        let serve = axum::serve(listener, self.router).with_graceful_shutdown(async move {
            let _ = graceful.recv().await;
        });

        tokio::select! {
            result = serve => result?,
            _ = async {
                let _ = drain.recv().await;
                tokio::time::sleep(DRAIN_WINDOW).await;
            } => {
                tracing::warn!("drain window elapsed with connections still open");
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn global_handler(State(state): State<AppState>) -> Response {
    let report = state.aggregator.report().await;
    let code = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report)).into_response()
}

async fn command_handler(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    check_response(&state, CheckKind::Command, &name).await
}

async fn service_handler(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    check_response(&state, CheckKind::Service, &name).await
}

async fn request_handler(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    check_response(&state, CheckKind::Request, &name).await
}

async fn check_response(state: &AppState, kind: CheckKind, name: &str) -> Response {
    let Some(check) = state.catalog.find(kind, name) else {
        return (
            StatusCode::NOT_FOUND,
            format!("no {kind} check named {name}\n"),
        )
            .into_response();
    };

    let result = check.status(&state.overrides).await;
    let code = if result.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(result)).into_response()
}

// Browsers ask for this when the report is viewed by hand.
async fn favicon_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}
