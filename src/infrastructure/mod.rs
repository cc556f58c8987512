//! Infrastructure layer module
//!
//! Concrete adapters behind the domain ports, plus process-level setup:
//! - HTTP request and SSE stream transports (reqwest)
//! - Configuration loading (figment)
//! - Logging (tracing)

pub mod config;
pub mod http;
pub mod logging;
