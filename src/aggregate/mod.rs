//! Global health aggregation.
//!
//! Fans out one evaluation per check across the whole catalog, waits for all
//! of them, and folds the results into a single report. Aggregation latency
//! is bounded by the slowest individual check's own timeout; there is no
//! extra aggregation-level bound.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;

use crate::check::{Catalog, Check, CheckResult};
use crate::remote::OverrideCache;

/// The aggregate health report served at the root endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GlobalStatus {
    /// Logical AND over every individual result. An empty catalog is healthy.
    pub healthy: bool,

    pub unhealthy_count: usize,

    /// Set when the maintenance sentinel forced the report unhealthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<CheckResult>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<CheckResult>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub requests: Vec<CheckResult>,
}

pub struct Aggregator {
    catalog: Arc<Catalog>,
    overrides: OverrideCache,
    maintenance_file: Option<PathBuf>,
}

impl Aggregator {
    pub fn new(
        catalog: Arc<Catalog>,
        overrides: OverrideCache,
        maintenance_file: Option<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            overrides,
            maintenance_file,
        }
    }

    /// Evaluate every check concurrently and fold the results.
    ///
    /// Each result lands in the slot matching its catalog position, so the
    /// per-kind lists keep configuration order.
    pub async fn report(&self) -> GlobalStatus {
        let (services, commands, requests) = tokio::join!(
            self.evaluate(self.catalog.services()),
            self.evaluate(self.catalog.commands()),
            self.evaluate(self.catalog.requests()),
        );

        let unhealthy_count = services
            .iter()
            .chain(&commands)
            .chain(&requests)
            .filter(|result| !result.healthy)
            .count();

        let mut healthy = unhealthy_count == 0;
        let mut reason = None;

        if let Some(path) = &self.maintenance_file {
            if path.exists() {
                tracing::warn!(path = %path.display(), "maintenance sentinel present, forcing unhealthy");
                healthy = false;
                reason = Some(format!(
                    "forced unhealthy: maintenance marker {} present",
                    path.display()
                ));
            }
        }

        GlobalStatus {
            healthy,
            unhealthy_count,
            reason,
            services,
            commands,
            requests,
        }
    }

    async fn evaluate(&self, checks: &[Arc<Check>]) -> Vec<CheckResult> {
        join_all(checks.iter().map(|check| check.status(&self.overrides))).await
    }
}
