//! HTTP adapters for the analysis backend
//!
//! - `client`: request/response transport over reqwest
//! - `sse`: text/event-stream parsing and the stream transport built on it

pub mod client;
pub mod sse;

pub use client::{endpoint_path, HttpTransport, STREAM_PATH};
pub use sse::{HttpStreamTransport, SseStreamParser};

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

use crate::domain::models::TransportConfig;

/// Build a client carrying the configured headers.
///
/// `request_timeout` bounds whole requests; stream clients pass `None` since
/// the body of a stream is read for as long as it stays open.
pub(crate) fn build_client(
    config: &TransportConfig,
    request_timeout: Option<Duration>,
) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("Invalid header name: {name}"))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("Invalid value for header {name}"))?;
        headers.insert(name, value);
    }

    let mut builder = reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(config.timeout_secs))
        .pool_max_idle_per_host(10)
        .tcp_nodelay(true);
    if let Some(timeout) = request_timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().context("Failed to build HTTP client")
}

/// Join the configured base URL and an endpoint path.
pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}
