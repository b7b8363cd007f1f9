//! Configuration subsystem.

pub mod loader;
pub mod schema;

pub use loader::{load, merge, ConfigError, ORG_CONFIG_ENV};
pub use schema::{CommandConfig, Config, ProxyConfig, RequestConfig, ServiceConfig};
