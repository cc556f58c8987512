use serde_json::Value;

use crate::domain::models::{AnalysisKind, ClinicalInput, SubjectId};

/// Builds backend payloads from a session's clinical context.
pub trait PayloadBuilder: Send + Sync {
    /// Payload for one analysis kind, or `None` to leave the kind out of the
    /// dispatch entirely.
    fn build(&self, subject: &SubjectId, kind: AnalysisKind, input: &ClinicalInput)
        -> Option<Value>;

    /// Payload used to open a stream.
    fn stream_payload(&self, subject: &SubjectId, input: &ClinicalInput) -> Value;
}
