//! Rate-limit retry with exponential backoff around a [`Transport`].

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::domain::errors::{AnalysisError, AnalysisResult};
use crate::domain::models::{AnalysisKind, RetryConfig};
use crate::domain::ports::{RawResponse, Transport};

/// Backoff schedule for rate-limited responses
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    max_attempts: u32,
    /// Wait after the first rate-limited attempt
    base_delay_ms: u64,
    /// Growth factor between consecutive waits
    backoff_factor: f64,
    /// Cap applied to any single wait
    max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, backoff_factor: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            backoff_factor: backoff_factor.max(1.0),
            max_delay_ms: u64::MAX,
        }
    }

    #[must_use]
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait after the `attempt`-th (1-based) rate-limited response:
    /// `min(base * factor^(attempt-1), max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let raw = self.base_delay_ms as f64 * self.backoff_factor.powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let capped = raw.min(self.max_delay_ms as f64);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(capped.round() as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay_ms, config.backoff_factor)
            .with_max_delay_ms(config.max_delay_ms)
    }
}

/// Wraps a transport so 429 responses are retried instead of failing.
///
/// Only rate limiting is retried. Transport errors and other error statuses
/// are returned on first occurrence. Dropping the `send` future aborts any
/// backoff wait in progress.
#[derive(Clone)]
pub struct RetryingTransport {
    inner: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl RetryingTransport {
    pub fn new(inner: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &Arc<dyn Transport> {
        &self.inner
    }

    /// Send one request, retrying while the backend answers 429.
    pub async fn send(&self, kind: AnalysisKind, payload: &Value) -> AnalysisResult<RawResponse> {
        let mut attempt = 1;

        loop {
            let response = self.inner.request(kind, payload).await?;

            if !response.is_rate_limited() {
                if attempt > 1 {
                    debug!(kind = %kind, attempt, "request succeeded after rate limiting");
                }
                return Ok(response);
            }

            if attempt >= self.policy.max_attempts {
                warn!(kind = %kind, attempts = attempt, "rate limit retries exhausted");
                return Err(AnalysisError::RateLimitExhausted { attempts: attempt });
            }

            let backoff = self.policy.delay_for(attempt);
            warn!(
                kind = %kind,
                attempt,
                max_attempts = self.policy.max_attempts,
                "rate limited; retrying in {:?}",
                backoff
            );
            sleep(backoff).await;
            attempt += 1;
        }
    }
}
