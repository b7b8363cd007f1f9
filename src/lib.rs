//! healthzd: health-check aggregation daemon.
//!
//! Runs heterogeneous probes (shell commands, HTTP requests, service-manager
//! queries), caches their results with single-flight semantics, aggregates
//! them into one global report served over HTTP, and honors remote override
//! flags distributed via DNS TXT records.

pub mod aggregate;
pub mod cache;
pub mod check;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod remote;

pub use aggregate::{Aggregator, GlobalStatus};
pub use check::{Catalog, Check, CheckResult};
pub use config::Config;
pub use http::{AppState, HttpServer};
pub use lifecycle::Shutdown;
pub use remote::{OverrideCache, OverridePoller};
