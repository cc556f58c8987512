//! Request payloads in the shapes the clinical backend expects.

use serde_json::{json, Map, Value};

use crate::domain::models::{AnalysisKind, ClinicalInput, SubjectId};
use crate::domain::ports::PayloadBuilder;

/// Builds per-kind payloads from a [`ClinicalInput`], skipping kinds that
/// have nothing to analyze.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClinicalPayloadBuilder;

impl ClinicalPayloadBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Numeric subjects are sent as numbers, anything else as a string.
    fn patient_id(subject: &SubjectId) -> Value {
        subject
            .as_str()
            .parse::<u64>()
            .map_or_else(|_| Value::String(subject.to_string()), Value::from)
    }

    /// Free-text history for endpoints that take it as a string; structured
    /// history is sent as compact JSON.
    fn history_text(history: &Value) -> Value {
        match history {
            Value::Null => Value::Null,
            Value::String(text) if text.trim().is_empty() => Value::Null,
            Value::String(text) => Value::String(text.clone()),
            other => Value::String(other.to_string()),
        }
    }

    /// Lab results keyed by test name. Unnamed entries get a positional key.
    fn labs_by_name(labs: &[Value]) -> Value {
        if labs.is_empty() {
            return Value::Null;
        }
        let keyed: Map<String, Value> = labs
            .iter()
            .enumerate()
            .map(|(index, lab)| {
                let name = ["test_name", "name"]
                    .iter()
                    .find_map(|key| lab.get(*key).and_then(Value::as_str))
                    .map_or_else(|| format!("lab_{}", index + 1), str::to_string);
                (name, lab.clone())
            })
            .collect();
        Value::Object(keyed)
    }
}

impl PayloadBuilder for ClinicalPayloadBuilder {
    fn build(
        &self,
        subject: &SubjectId,
        kind: AnalysisKind,
        input: &ClinicalInput,
    ) -> Option<Value> {
        let patient_id = Self::patient_id(subject);

        match kind {
            AnalysisKind::Diagnosis => input.has_notes().then(|| {
                json!({
                    "patient_id": patient_id,
                    "current_notes": input.notes,
                    "patient_history": input.patient_history,
                    "lab_results": input.lab_results,
                    "imaging_results": input.imaging_results,
                })
            }),
            AnalysisKind::LabTests => (!input.lab_results.is_empty()).then(|| {
                json!({
                    "patient_id": patient_id,
                    "lab_data": input.lab_results,
                })
            }),
            AnalysisKind::DrugInteractions => (!input.medications.is_empty()).then(|| {
                json!({
                    "patient_id": patient_id,
                    "medications": input.medications,
                })
            }),
            AnalysisKind::Symptoms => input.has_notes().then(|| {
                json!({
                    "patient_id": patient_id,
                    "notes": input.notes,
                })
            }),
            AnalysisKind::Treatment => input.has_notes().then(|| {
                let symptoms = if input.symptoms.is_empty() {
                    vec![input.notes.clone()]
                } else {
                    input.symptoms.clone()
                };
                json!({
                    "patient_symptoms": symptoms,
                    "patient_history": Self::history_text(&input.patient_history),
                    "lab_results": Self::labs_by_name(&input.lab_results),
                    "current_medications": input.medications,
                })
            }),
            AnalysisKind::Imaging => (!input.imaging_results.is_empty()).then(|| {
                json!({
                    "patient_id": patient_id,
                    "imaging_data": input.imaging_results,
                })
            }),
        }
    }

    fn stream_payload(&self, subject: &SubjectId, input: &ClinicalInput) -> Value {
        json!({
            "patient_id": Self::patient_id(subject),
            "notes": input.notes,
        })
    }
}
