//! Check catalog, results and the shared evaluation contract.
//!
//! # Responsibilities
//! - Model the three probe kinds behind one `status()` capability
//! - Own the per-check single-flight cache and the timeout clamp
//! - Apply remote override masking to unhealthy raw results
//!
//! The cache and the aggregator only ever see [`Check::status`]; they are
//! oblivious to which kind of probe sits behind it.

pub mod backend;
pub mod command;
pub mod request;
pub mod service;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::SingleFlight;
use crate::check::service::ServiceBackend;
use crate::check::command::CommandRunner;
use crate::check::request::RequestRunner;
use crate::check::service::ServiceRunner;
use crate::config::{CommandConfig, Config, ConfigError, RequestConfig, ServiceConfig};
use crate::remote::OverrideCache;

/// Hard ceiling on a probe's timeout. Configured values above it are clamped.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(20);

/// Timeout applied when a check does not configure one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Result freshness window applied when a check does not configure one.
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(5);

/// The three probe kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckKind {
    Command,
    Service,
    Request,
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckKind::Command => f.write_str("command"),
            CheckKind::Service => f.write_str("service"),
            CheckKind::Request => f.write_str("request"),
        }
    }
}

/// Outcome of one probe evaluation. Serialized as the JSON document served
/// by the HTTP layer (PascalCase, wire-compatible with earlier deployments).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CheckResult {
    pub name: String,

    pub healthy: bool,

    pub timestamp: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Set only when an unhealthy raw result was masked by a remote override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(flatten)]
    pub payload: CheckPayload,
}

/// Kind-specific payload of a [`CheckResult`]. Sensitive checks leave the
/// capture fields unset; they are omitted from the JSON entirely.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CheckPayload {
    #[serde(rename_all = "PascalCase")]
    Command {
        #[serde(skip_serializing_if = "Option::is_none")]
        command: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
    },
    #[serde(rename_all = "PascalCase")]
    Request {
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<serde_json::Value>,
    },
    #[serde(rename_all = "PascalCase")]
    Service {
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<serde_json::Map<String, serde_json::Value>>,
    },
}

enum Runner {
    Command(CommandRunner),
    Request(RequestRunner),
    Service(ServiceRunner),
}

/// A named health probe with its own result cache and effective timeout.
pub struct Check {
    name: String,
    timeout: Duration,
    runner: Runner,
    cache: SingleFlight<CheckResult>,
}

impl Check {
    pub fn from_command(cfg: &CommandConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            timeout: effective_timeout(&cfg.name, cfg.timeout),
            runner: Runner::Command(CommandRunner::new(cfg.cmd.clone(), cfg.sensitive)),
            cache: SingleFlight::new(cfg.cache.unwrap_or(DEFAULT_FRESHNESS)),
        }
    }

    pub fn from_request(cfg: &RequestConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            name: cfg.name.clone(),
            timeout: effective_timeout(&cfg.name, cfg.timeout),
            runner: Runner::Request(RequestRunner::new(cfg)?),
            cache: SingleFlight::new(cfg.cache.unwrap_or(DEFAULT_FRESHNESS)),
        })
    }

    pub fn from_service(cfg: &ServiceConfig, backend: Arc<dyn ServiceBackend>) -> Self {
        Self {
            name: cfg.name.clone(),
            timeout: effective_timeout(&cfg.name, cfg.timeout),
            runner: Runner::Service(ServiceRunner::new(backend)),
            cache: SingleFlight::new(cfg.cache.unwrap_or(DEFAULT_FRESHNESS)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CheckKind {
        match &self.runner {
            Runner::Command(_) => CheckKind::Command,
            Runner::Request(_) => CheckKind::Request,
            Runner::Service(_) => CheckKind::Service,
        }
    }

    /// Effective (clamped) probe timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Evaluate the check through its cache, then mask an unhealthy result
    /// if a live remote override exists for this name.
    ///
    /// The mask is applied to the returned copy only; the cached raw result
    /// stays unmasked so the override TTL is consulted on every call.
    pub async fn status(&self, overrides: &OverrideCache) -> CheckResult {
        let mut result = self.cache.get(&self.name, || self.execute()).await;

        if !result.healthy {
            if let Some(record) = overrides.lookup(&self.name) {
                tracing::info!(
                    check = %self.name,
                    record = %record,
                    "unhealthy result masked, check disabled remotely"
                );
                result.reason = Some(format!("disabled remotely via {record}"));
                result.healthy = true;
            }
        }

        result
    }

    async fn execute(&self) -> CheckResult {
        match &self.runner {
            Runner::Command(runner) => runner.execute(&self.name, self.timeout).await,
            Runner::Request(runner) => runner.execute(&self.name, self.timeout).await,
            Runner::Service(runner) => runner.execute(&self.name, self.timeout).await,
        }
    }
}

fn effective_timeout(name: &str, configured: Option<Duration>) -> Duration {
    let timeout = configured.unwrap_or(DEFAULT_TIMEOUT);
    if timeout > MAX_TIMEOUT {
        tracing::warn!(
            check = %name,
            configured = ?timeout,
            "timeout cannot be longer than 20 seconds, clamping"
        );
        return MAX_TIMEOUT;
    }
    timeout
}

/// The full set of configured checks, indexed by kind and name.
///
/// Name uniqueness is enforced here: a later definition with the same name
/// replaces the earlier one, which is what lets the organization overlay win.
pub struct Catalog {
    commands: Vec<Arc<Check>>,
    services: Vec<Arc<Check>>,
    requests: Vec<Arc<Check>>,
    index: HashMap<(CheckKind, String), Arc<Check>>,
}

impl Catalog {
    pub fn from_config(
        cfg: &Config,
        backend: Arc<dyn ServiceBackend>,
    ) -> Result<Self, ConfigError> {
        let commands: Vec<Arc<Check>> = last_wins(&cfg.commands, |c| &c.name)
            .into_iter()
            .map(|c| Arc::new(Check::from_command(c)))
            .collect();

        let services: Vec<Arc<Check>> = last_wins(&cfg.services, |s| &s.name)
            .into_iter()
            .map(|s| Arc::new(Check::from_service(s, backend.clone())))
            .collect();

        let mut requests = Vec::new();
        for req in last_wins(&cfg.requests, |r| &r.name) {
            requests.push(Arc::new(Check::from_request(req)?));
        }

        let mut index = HashMap::new();
        for check in commands.iter().chain(&services).chain(&requests) {
            index.insert((check.kind(), check.name().to_owned()), check.clone());
        }

        Ok(Self {
            commands,
            services,
            requests,
            index,
        })
    }

    pub fn find(&self, kind: CheckKind, name: &str) -> Option<&Arc<Check>> {
        self.index.get(&(kind, name.to_owned()))
    }

    pub fn commands(&self) -> &[Arc<Check>] {
        &self.commands
    }

    pub fn services(&self) -> &[Arc<Check>] {
        &self.services
    }

    pub fn requests(&self) -> &[Arc<Check>] {
        &self.requests
    }

    pub fn len(&self) -> usize {
        self.commands.len() + self.services.len() + self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keep only the last occurrence of each name, preserving the order in which
/// the surviving entries appear.
fn last_wins<'a, T, F>(items: &'a [T], name: F) -> Vec<&'a T>
where
    F: Fn(&T) -> &str,
{
    let mut seen = std::collections::HashSet::new();
    let mut kept: Vec<&T> = Vec::with_capacity(items.len());
    for item in items.iter().rev() {
        if seen.insert(name(item).to_owned()) {
            kept.push(item);
        }
    }
    kept.reverse();
    kept
}
