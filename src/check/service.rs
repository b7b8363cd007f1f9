//! Service-manager probe.
//!
//! The runner only knows the black-box [`ServiceBackend`] capability; the
//! platform-specific implementations live in [`crate::check::backend`].
//! Healthy means the backend reports the service running. A backend that
//! cannot be reached degrades to an unhealthy result, never a crash.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::check::{CheckPayload, CheckResult};

/// Run state of a named service as reported by a backend.
#[derive(Debug, Clone)]
pub struct ServiceState {
    pub running: bool,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("service {0} not found")]
    NotFound(String),

    #[error("service manager unavailable: {0}")]
    Unavailable(String),

    #[error("failed to query service {name}: {message}")]
    Query { name: String, message: String },
}

/// Black-box "query service state" capability.
#[async_trait]
pub trait ServiceBackend: Send + Sync {
    async fn query(&self, name: &str) -> Result<ServiceState, BackendError>;
}

pub struct ServiceRunner {
    backend: Arc<dyn ServiceBackend>,
}

impl ServiceRunner {
    pub fn new(backend: Arc<dyn ServiceBackend>) -> Self {
        Self { backend }
    }

    pub async fn execute(&self, name: &str, timeout: Duration) -> CheckResult {
        tracing::debug!(check = %name, "querying service state");

        let (healthy, error, state) =
            match tokio::time::timeout(timeout, self.backend.query(name)).await {
                Err(_) => {
                    tracing::warn!(check = %name, "service query timed out");
                    (false, Some("service query timed out".to_owned()), None)
                }
                Ok(Err(err)) => {
                    tracing::warn!(check = %name, error = %err, "service query failed");
                    (false, Some(err.to_string()), None)
                }
                Ok(Ok(state)) => (state.running, None, Some(state.properties)),
            };

        CheckResult {
            name: name.to_owned(),
            healthy,
            timestamp: Utc::now(),
            error,
            reason: None,
            payload: CheckPayload::Service { state },
        }
    }
}
