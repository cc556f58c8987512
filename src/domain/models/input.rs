use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Clinical context a session analyzes: free-text notes plus whatever parts
/// of the patient record are at hand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClinicalInput {
    /// Clinician notes, usually the debounced text field
    #[serde(default)]
    pub notes: String,

    /// Extracted or reported symptoms
    #[serde(default)]
    pub symptoms: Vec<String>,

    /// Current medication names
    #[serde(default)]
    pub medications: Vec<String>,

    /// Lab results as the record stores them
    #[serde(default)]
    pub lab_results: Vec<Value>,

    /// Imaging studies as the record stores them
    #[serde(default)]
    pub imaging_results: Vec<Value>,

    /// Free-form history section of the record
    #[serde(default)]
    pub patient_history: Value,
}

impl ClinicalInput {
    pub fn from_notes(notes: impl Into<String>) -> Self {
        Self {
            notes: notes.into(),
            ..Self::default()
        }
    }

    /// Same context with the notes replaced.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn has_notes(&self) -> bool {
        !self.notes.trim().is_empty()
    }
}
