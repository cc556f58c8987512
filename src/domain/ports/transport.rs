//! Transport port - request/response access to the analysis backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::AnalysisResult;
use crate::domain::models::{AnalysisKind, SubjectId};

/// HTTP status the backend uses to signal rate limiting.
pub const RATE_LIMITED_STATUS: u16 = 429;

/// Response of a single backend call, whatever its status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResponse {
    pub ok: bool,
    pub status: u16,
    pub body: Value,
}

impl RawResponse {
    /// Build a response; `ok` is derived from the status.
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            ok: (200..300).contains(&status),
            status,
            body,
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    pub fn rate_limited() -> Self {
        Self::new(RATE_LIMITED_STATUS, Value::Null)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == RATE_LIMITED_STATUS
    }

    /// Human-readable error message from the body (`detail` or `error`).
    pub fn error_message(&self) -> String {
        ["detail", "error", "message"]
            .iter()
            .find_map(|key| self.body.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .or_else(|| self.body.as_str().filter(|s| !s.is_empty()).map(str::to_string))
            .unwrap_or_else(|| format!("HTTP {}", self.status))
    }
}

/// Trait for the backend request capability.
///
/// Implementations return `Ok` for every response the backend produced,
/// including error statuses, and `Err` only when no response was obtained.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one analysis request.
    async fn request(&self, kind: AnalysisKind, payload: &Value) -> AnalysisResult<RawResponse>;

    /// Drop any server-side context cached for the subject.
    async fn clear_context(&self, _subject: &SubjectId) -> AnalysisResult<()> {
        Ok(())
    }
}
