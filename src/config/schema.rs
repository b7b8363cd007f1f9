//! Configuration schema definitions.
//!
//! The on-disk format is YAML. Duration fields accept humantime strings
//! ("5s", "2m"). All types derive Serde traits for deserialization.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Root configuration for the daemon.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind address (defaults to "0.0.0.0:8080" when unset).
    pub bind: Option<String>,

    /// DNS record names polled for remote override flags.
    pub dns_records: Vec<String>,

    /// Sentinel file whose presence forces the global report unhealthy.
    pub maintenance_file: Option<PathBuf>,

    /// Command (subprocess) checks.
    pub commands: Vec<CommandConfig>,

    /// Service-manager checks.
    pub services: Vec<ServiceConfig>,

    /// HTTP request checks.
    pub requests: Vec<RequestConfig>,

    /// Local reverse-proxy passthroughs.
    pub proxies: Vec<ProxyConfig>,
}

impl Config {
    pub fn bind_addr(&self) -> &str {
        self.bind.as_deref().unwrap_or("0.0.0.0:8080")
    }
}

/// A shell-command health check. The command line is split on whitespace
/// with no shell interpretation.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    pub name: String,

    pub cmd: String,

    /// Result freshness window (default 5s).
    #[serde(default, with = "humantime_serde::option")]
    pub cache: Option<Duration>,

    /// Probe timeout (default 5s, clamped to 20s).
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,

    /// Suppress the command line and captured output in results.
    #[serde(default)]
    pub sensitive: bool,
}

/// A service-manager health check, keyed by the platform service name
/// (systemd unit, launchd label).
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,

    #[serde(default, with = "humantime_serde::option")]
    pub cache: Option<Duration>,

    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
}

/// An HTTP request health check.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestConfig {
    pub name: String,

    pub url: String,

    /// HTTP method (default GET).
    pub method: Option<String>,

    /// Request body, sent for POST only.
    pub body: Option<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Accepted response status codes (default [200]).
    pub codes: Option<Vec<u16>>,

    #[serde(default, with = "humantime_serde::option")]
    pub cache: Option<Duration>,

    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,

    /// Suppress response body capture in results.
    #[serde(default)]
    pub sensitive: bool,

    /// Skip TLS certificate verification.
    #[serde(default)]
    pub insecure: bool,
}

/// A reverse-proxy passthrough to a local port, mounted at `/{name}/...`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub name: String,

    pub port: u16,

    /// HTTP methods forwarded. Empty forwards every method.
    #[serde(default)]
    pub methods: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_document() {
        let yaml = r#"
bind: 127.0.0.1:3456
dns_records:
  - healthz.example.com
maintenance_file: /var/run/healthzd.maintenance
commands:
  - name: disk
    cmd: df -h /
    cache: 10s
    timeout: 60s
  - name: secret
    cmd: vault status
    sensitive: true
services:
  - name: sshd
requests:
  - name: api
    url: http://127.0.0.1:9000/health
    codes: [200, 204]
    insecure: true
    headers:
      Authorization: Bearer token
proxies:
  - name: app
    port: 3000
    methods: [GET, POST]
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:3456");
        assert_eq!(cfg.dns_records, vec!["healthz.example.com"]);
        assert_eq!(cfg.commands.len(), 2);
        assert_eq!(cfg.commands[0].cache, Some(Duration::from_secs(10)));
        assert_eq!(cfg.commands[0].timeout, Some(Duration::from_secs(60)));
        assert!(cfg.commands[1].sensitive);
        assert_eq!(cfg.services[0].name, "sshd");
        assert_eq!(cfg.requests[0].codes, Some(vec![200, 204]));
        assert!(cfg.requests[0].insecure);
        assert_eq!(cfg.proxies[0].methods, vec!["GET", "POST"]);
    }

    #[test]
    fn defaults_apply_to_empty_document() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.bind_addr(), "0.0.0.0:8080");
        assert!(cfg.commands.is_empty());
        assert!(cfg.maintenance_file.is_none());
    }

    #[test]
    fn malformed_duration_is_rejected() {
        let yaml = "commands:\n  - name: disk\n    cmd: df\n    timeout: banana\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }
}
