//! Configuration loading from disk.
//!
//! # Responsibilities
//! - Read and parse the YAML configuration file
//! - Merge the enforced organization configuration on top, when present
//!
//! Any failure here is fatal: a daemon with a broken catalog must not start.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::Config;

/// Environment variable naming an organization-enforced configuration file
/// merged over the local one. Its list entries win on name collisions.
pub const ORG_CONFIG_ENV: &str = "HEALTHZD_ORG_CONFIG";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("check {name}: {message}")]
    Invalid { name: String, message: String },

    #[error("proxy {name}: {message}")]
    InvalidProxy { name: String, message: String },
}

/// Load the configuration, applying the organization overlay named by
/// [`ORG_CONFIG_ENV`] when the variable is set.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let mut cfg = read_file(path)?;

    if let Ok(org_path) = std::env::var(ORG_CONFIG_ENV) {
        let org = read_file(Path::new(&org_path))?;
        tracing::info!(path = %org_path, "merging organization configuration");
        merge(&mut cfg, org);
    }

    Ok(cfg)
}

fn read_file(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Merge `org` into `base`. Check and proxy lists are appended, so the org
/// entries take precedence under the catalog's last-wins de-duplication.
/// Scalars fall back to the org value only when unset locally.
pub fn merge(base: &mut Config, org: Config) {
    if base.bind.is_none() {
        base.bind = org.bind;
    }
    if base.maintenance_file.is_none() {
        base.maintenance_file = org.maintenance_file;
    }

    for record in org.dns_records {
        if !base.dns_records.contains(&record) {
            base.dns_records.push(record);
        }
    }

    base.commands.extend(org.commands);
    base.services.extend(org.services);
    base.requests.extend(org.requests);
    base.proxies.extend(org.proxies);
}
