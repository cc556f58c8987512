//! Stream transport port - server-push connections delivering analysis messages.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::domain::errors::AnalysisResult;
use crate::domain::models::{RawStreamMessage, SubjectId};

/// One item read from a stream connection.
///
/// `Err(AnalysisError::Parse)` marks a single malformed message; any other
/// error is fatal for the connection. The channel closing means the remote
/// side ended the stream.
pub type StreamItem = AnalysisResult<RawStreamMessage>;

/// Handle used to tear down the underlying connection.
pub trait StreamControl: Send + Sync {
    /// Close the connection. Must be idempotent.
    fn close(&self);
}

/// An open server-push connection.
pub struct StreamConnection {
    pub messages: mpsc::Receiver<StreamItem>,
    pub control: Arc<dyn StreamControl>,
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection").finish_non_exhaustive()
    }
}

/// Trait for the stream capability (SSE, WebSocket, long-poll...).
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open_stream(
        &self,
        subject: &SubjectId,
        payload: &Value,
    ) -> AnalysisResult<StreamConnection>;
}
