//! Platform service-manager backends.
//!
//! Each backend shells out to the platform's service-manager CLI rather than
//! binding its IPC socket directly; the [`ServiceBackend`] trait keeps that
//! an implementation detail the rest of the daemon cannot observe.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::process::Command;

use crate::check::service::{BackendError, ServiceBackend, ServiceState};

/// Select the backend for the running platform.
pub fn platform_backend() -> Arc<dyn ServiceBackend> {
    if cfg!(target_os = "linux") {
        return Arc::new(SystemdBackend);
    }
    if cfg!(target_os = "macos") {
        return Arc::new(LaunchdBackend);
    }
    Arc::new(UnsupportedBackend)
}

async fn run(program: &str, args: &[&str]) -> Result<std::process::Output, BackendError> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| BackendError::Unavailable(format!("{program}: {e}")))
}

/// systemd backend: `systemctl show` exposes the unit properties the health
/// report carries (SubState, StatusErrno, StatusText).
pub struct SystemdBackend;

#[async_trait]
impl ServiceBackend for SystemdBackend {
    async fn query(&self, name: &str) -> Result<ServiceState, BackendError> {
        let output = run(
            "systemctl",
            &[
                "show",
                name,
                "--property=LoadState,SubState,StatusErrno,StatusText",
            ],
        )
        .await?;

        if !output.status.success() {
            return Err(BackendError::Query {
                name: name.to_owned(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        let mut properties = Map::new();
        let mut load_state = String::new();
        let mut sub_state = String::new();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                "LoadState" => load_state = value.to_owned(),
                "SubState" => sub_state = value.to_owned(),
                _ => {}
            }
            if key != "LoadState" {
                properties.insert(key.to_owned(), Value::String(value.to_owned()));
            }
        }

        if load_state == "not-found" {
            return Err(BackendError::NotFound(name.to_owned()));
        }

        Ok(ServiceState {
            running: sub_state == "running",
            properties,
        })
    }
}

/// launchd backend: parses `launchctl list`, whose rows are `pid status label`
/// with `-` standing for unset.
pub struct LaunchdBackend;

#[async_trait]
impl ServiceBackend for LaunchdBackend {
    async fn query(&self, name: &str) -> Result<ServiceState, BackendError> {
        let output = run("launchctl", &["list"]).await?;

        if !output.status.success() {
            return Err(BackendError::Query {
                name: name.to_owned(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_launchctl_list(name, &stdout).ok_or_else(|| BackendError::NotFound(name.to_owned()))
    }
}

fn parse_launchctl_list(name: &str, listing: &str) -> Option<ServiceState> {
    for line in listing.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 || fields[2] != name {
            continue;
        }

        let pid = (fields[0] != "-").then(|| fields[0].to_owned());
        let mut last_exit_status = (fields[1] != "-").then(|| fields[1].to_owned());

        // A live pid makes the previous run's exit status meaningless;
        // clear it to avoid confusion.
        let running = pid.is_some();
        if pid.as_deref().and_then(|p| p.parse::<i64>().ok()).unwrap_or(0) > 0 {
            last_exit_status = None;
        }

        let mut properties = Map::new();
        properties.insert("label".to_owned(), Value::String(name.to_owned()));
        properties.insert(
            "pid".to_owned(),
            Value::String(pid.unwrap_or_default()),
        );
        properties.insert(
            "lastExitStatus".to_owned(),
            Value::String(last_exit_status.unwrap_or_default()),
        );

        return Some(ServiceState {
            running,
            properties,
        });
    }
    None
}

/// Fallback for platforms without a supported service manager.
pub struct UnsupportedBackend;

#[async_trait]
impl ServiceBackend for UnsupportedBackend {
    async fn query(&self, _name: &str) -> Result<ServiceState, BackendError> {
        Err(BackendError::Unavailable(
            "no service manager backend for this platform".into(),
        ))
    }
}

/// A fixed-state backend for wiring up deterministic tests.
pub struct StaticBackend {
    running: bool,
}

impl StaticBackend {
    pub fn running() -> Self {
        Self { running: true }
    }

    pub fn stopped() -> Self {
        Self { running: false }
    }
}

#[async_trait]
impl ServiceBackend for StaticBackend {
    async fn query(&self, _name: &str) -> Result<ServiceState, BackendError> {
        let mut properties = Map::new();
        properties.insert(
            "SubState".to_owned(),
            Value::String(if self.running { "running" } else { "dead" }.to_owned()),
        );
        Ok(ServiceState {
            running: self.running,
            properties,
        })
    }
}
