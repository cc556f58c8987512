//! Domain errors for the clinical-analysis orchestration core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of an analysis failure, carried inside
/// [`AnalysisOutcome::Failure`](crate::domain::models::AnalysisOutcome).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network or connection failure.
    TransportError,
    /// HTTP 429 retried until the attempt budget ran out.
    RateLimitExhausted,
    /// Non-429 error status returned by a specific analysis endpoint.
    EndpointError,
    /// Failure of the long-lived stream connection.
    StreamTransportError,
    /// A message that could not be decoded.
    ParseError,
    /// Result belonged to a superseded generation. Never surfaced.
    CancelledByGeneration,
    /// Call on a session handle whose session was released.
    SessionReleased,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransportError => "transport_error",
            Self::RateLimitExhausted => "rate_limit_exhausted",
            Self::EndpointError => "endpoint_error",
            Self::StreamTransportError => "stream_transport_error",
            Self::ParseError => "parse_error",
            Self::CancelledByGeneration => "cancelled_by_generation",
            Self::SessionReleased => "session_released",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while talking to the analysis backend or driving a session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limit exhausted after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },

    #[error("Endpoint error ({status}): {message}")]
    Endpoint { status: u16, message: String },

    #[error("Stream transport error: {0}")]
    StreamTransport(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Result for generation {stale} superseded by generation {current}")]
    CancelledByGeneration { stale: u64, current: u64 },

    #[error("Session for subject {0} was released")]
    SessionReleased(String),
}

impl AnalysisError {
    /// Classification used when the error is folded into an outcome.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::TransportError,
            Self::RateLimitExhausted { .. } => ErrorKind::RateLimitExhausted,
            Self::Endpoint { .. } => ErrorKind::EndpointError,
            Self::StreamTransport(_) => ErrorKind::StreamTransportError,
            Self::Parse(_) => ErrorKind::ParseError,
            Self::CancelledByGeneration { .. } => ErrorKind::CancelledByGeneration,
            Self::SessionReleased(_) => ErrorKind::SessionReleased,
        }
    }

    /// Returns true if this error terminates a stream session.
    pub fn is_stream_fatal(&self) -> bool {
        matches!(self, Self::StreamTransport(_) | Self::Transport(_))
    }
}

impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for AnalysisError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
