//! Stream event models.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::AnalysisError;

/// Phase of an incremental analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEventKind {
    Initial,
    Progressive,
    Final,
}

/// An incremental analysis event, numbered in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub sequence: u64,
    pub kind: StreamEventKind,
    pub payload: Value,
}

/// Message as it arrives from a stream transport: `{"type": .., "data": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStreamMessage {
    #[serde(rename = "type")]
    pub message_type: String,

    #[serde(default)]
    pub data: Value,

    /// Set by the backend on `error` messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RawStreamMessage {
    pub fn new(message_type: impl Into<String>, data: Value) -> Self {
        Self {
            message_type: message_type.into(),
            data,
            error: None,
        }
    }

    /// Decode the wire type.
    ///
    /// An `error` message yields a stream transport error and anything
    /// unrecognised a parse error.
    pub fn classify(&self) -> Result<StreamEventKind, AnalysisError> {
        match self.message_type.as_str() {
            "initial" | "initial_analysis" => Ok(StreamEventKind::Initial),
            "progressive" | "progressive_insight" => Ok(StreamEventKind::Progressive),
            "final" | "final_analysis" => Ok(StreamEventKind::Final),
            "error" => Err(AnalysisError::StreamTransport(
                self.error
                    .clone()
                    .or_else(|| self.data.as_str().map(str::to_string))
                    .unwrap_or_else(|| "stream reported an error".to_string()),
            )),
            other => Err(AnalysisError::Parse(format!(
                "unknown stream message type '{other}'"
            ))),
        }
    }
}

/// Lifecycle of a single stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Opening,
    Open,
    Closed,
    Errored,
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}
