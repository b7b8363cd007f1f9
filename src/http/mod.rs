//! HTTP layer: server, handlers and the reverse-proxy passthrough.

pub mod proxy;
pub mod server;

pub use server::{AppState, HttpServer, DRAIN_WINDOW};
