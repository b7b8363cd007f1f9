//! Subprocess probe.
//!
//! The configured command line is split on whitespace with no shell
//! interpretation and run under the check's timeout. Healthy means exit
//! code zero.

use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use tokio::process::Command;

use crate::check::{CheckPayload, CheckResult};

pub struct CommandRunner {
    command: String,
    sensitive: bool,
}

impl CommandRunner {
    pub fn new(command: String, sensitive: bool) -> Self {
        Self { command, sensitive }
    }

    pub async fn execute(&self, name: &str, timeout: Duration) -> CheckResult {
        let timestamp = Utc::now();
        let argv: Vec<&str> = self.command.split_whitespace().collect();

        let Some((program, args)) = argv.split_first() else {
            return self.result(name, false, Some("empty command line".into()), None, None);
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(check = %name, "executing command");

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            // Dropping the future kills the child via kill_on_drop.
            Err(_) => {
                tracing::warn!(check = %name, timeout = ?timeout, "command timed out");
                return CheckResult {
                    timestamp,
                    ..self.result(name, false, Some("command timed out".into()), None, None)
                };
            }
            Ok(Err(err)) => {
                tracing::warn!(check = %name, error = %err, "command failed to start");
                return CheckResult {
                    timestamp,
                    ..self.result(name, false, Some(err.to_string()), None, None)
                };
            }
            Ok(Ok(output)) => output,
        };

        let code = output.status.code();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();

        if output.status.success() {
            let error = (!stderr.is_empty()).then_some(stderr);
            return CheckResult {
                timestamp,
                ..self.result(name, true, error, Some(stdout), code)
            };
        }

        let error = match code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_owned(),
        };
        tracing::warn!(check = %name, error = %error, "command unhealthy");
        if !self.sensitive && !stderr.is_empty() {
            tracing::warn!(check = %name, stderr = %stderr, "command stderr");
        }

        CheckResult {
            timestamp,
            ..self.result(name, false, Some(error), Some(stderr), code)
        }
    }

    /// Assemble a result, applying the sensitive redaction: the command line
    /// and captured output are never populated, in success or failure. The
    /// exit code is retained either way; the healthy flag already reveals
    /// whether it was zero.
    fn result(
        &self,
        name: &str,
        healthy: bool,
        error: Option<String>,
        output: Option<String>,
        code: Option<i32>,
    ) -> CheckResult {
        let (command, output, error) = if self.sensitive {
            (None, None, if healthy { None } else { error })
        } else {
            (Some(self.command.clone()), output, error)
        };

        CheckResult {
            name: name.to_owned(),
            healthy,
            timestamp: Utc::now(),
            error,
            reason: None,
            payload: CheckPayload::Command {
                command,
                output: output.filter(|o| !o.is_empty()),
                code,
            },
        }
    }
}
