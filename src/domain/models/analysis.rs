//! Analysis requests, per-kind outcomes and the aggregate built from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::config::{ConfidenceThresholds, UrgencyThresholds};
use super::stream::StreamEvent;
use crate::domain::errors::{AnalysisError, ErrorKind};

/// Opaque identifier of the entity being analyzed (a patient).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SubjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for SubjectId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// The independent analysis capabilities a trigger fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Diagnosis,
    LabTests,
    DrugInteractions,
    Symptoms,
    Treatment,
    Imaging,
}

impl AnalysisKind {
    /// Every kind, in dispatch order.
    pub const ALL: [Self; 6] = [
        Self::Diagnosis,
        Self::LabTests,
        Self::DrugInteractions,
        Self::Symptoms,
        Self::Treatment,
        Self::Imaging,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Diagnosis => "diagnosis",
            Self::LabTests => "lab_tests",
            Self::DrugInteractions => "drug_interactions",
            Self::Symptoms => "symptoms",
            Self::Treatment => "treatment",
            Self::Imaging => "imaging",
        }
    }

    /// Parse from string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "diagnosis" => Some(Self::Diagnosis),
            "lab_tests" | "labtests" | "labs" => Some(Self::LabTests),
            "drug_interactions" | "druginteractions" => Some(Self::DrugInteractions),
            "symptoms" => Some(Self::Symptoms),
            "treatment" => Some(Self::Treatment),
            "imaging" => Some(Self::Imaging),
            _ => None,
        }
    }
}

impl std::fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One leg of a fan-out dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub subject: SubjectId,
    pub kind: AnalysisKind,
    pub payload: Value,
    pub submitted_at_generation: u64,
}

/// Four-level urgency category derived from an urgency score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UrgencyLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl UrgencyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }

    /// Parse a backend urgency label. Case-insensitive.
    pub fn parse(level: &str) -> Option<Self> {
        match level.trim().to_lowercase().as_str() {
            "critical" | "emergency" => Some(Self::Critical),
            "high" | "urgent" => Some(Self::High),
            "medium" | "moderate" => Some(Self::Medium),
            "low" | "routine" => Some(Self::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence category of an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    Inconclusive,
    Moderate,
    High,
}

/// Settled result of one analysis kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Success {
        payload: Value,
        confidence: f64,
        urgency_score: f64,
    },
    Failure {
        error_kind: ErrorKind,
        message: String,
    },
}

impl AnalysisOutcome {
    /// Build a success outcome from a backend response body.
    ///
    /// Confidence comes from `confidence` or `confidence_score` (values above 1
    /// are percentages). Urgency comes from `urgency_score`, falling back to the
    /// textual `urgency_level`, scored at the floor of that level under
    /// `urgency` so it bands back to the same level.
    pub fn from_body(body: Value, urgency: &UrgencyThresholds) -> Self {
        let confidence = extract_confidence(&body);
        let urgency_score = extract_urgency(&body, urgency);
        Self::Success {
            payload: body,
            confidence,
            urgency_score,
        }
    }

    pub fn failure(err: &AnalysisError) -> Self {
        Self::Failure {
            error_kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

fn number_field(body: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| body.get(*key).and_then(Value::as_f64))
}

fn extract_confidence(body: &Value) -> f64 {
    let raw = number_field(body, &["confidence", "confidence_score"])
        .or_else(|| {
            body.get("primary_diagnosis")
                .and_then(|p| number_field(p, &["confidence"]))
        })
        .unwrap_or(0.0);
    let normalized = if raw > 1.0 { raw / 100.0 } else { raw };
    normalized.clamp(0.0, 1.0)
}

fn extract_urgency(body: &Value, thresholds: &UrgencyThresholds) -> f64 {
    number_field(body, &["urgency_score"])
        .or_else(|| {
            body.get("urgency_level")
                .and_then(Value::as_str)
                .and_then(UrgencyLevel::parse)
                .map(|level| thresholds.floor(level))
        })
        .unwrap_or(0.0)
        .clamp(0.0, 1.0)
}

/// Partial-failure-tolerant combination of one dispatch's outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateAnalysis {
    /// Generation of the trigger that produced this aggregate
    pub generation: u64,
    pub outcomes: BTreeMap<AnalysisKind, AnalysisOutcome>,
    /// Mean confidence of the successful outcomes
    pub overall_confidence: Option<f64>,
    pub confidence_band: Option<ConfidenceBand>,
    /// Highest urgency score among the successful outcomes
    pub max_urgency_score: Option<f64>,
    pub overall_urgency: Option<UrgencyLevel>,
    /// Sequence of the last stream event folded in, if any
    pub last_stream_sequence: Option<u64>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AggregateAnalysis {
    pub fn empty() -> Self {
        Self {
            generation: 0,
            outcomes: BTreeMap::new(),
            overall_confidence: None,
            confidence_band: None,
            max_urgency_score: None,
            overall_urgency: None,
            last_stream_sequence: None,
            updated_at: None,
        }
    }

    pub fn from_outcomes(
        generation: u64,
        outcomes: impl IntoIterator<Item = (AnalysisKind, AnalysisOutcome)>,
        confidence: &ConfidenceThresholds,
        urgency: &UrgencyThresholds,
    ) -> Self {
        let mut aggregate = Self {
            generation,
            outcomes: outcomes.into_iter().collect(),
            ..Self::empty()
        };
        aggregate.recompute(confidence, urgency);
        aggregate
    }

    /// Refresh the derived confidence and urgency fields.
    pub fn recompute(&mut self, confidence: &ConfidenceThresholds, urgency: &UrgencyThresholds) {
        let successes: Vec<(f64, f64)> = self
            .outcomes
            .values()
            .filter_map(|outcome| match outcome {
                AnalysisOutcome::Success {
                    confidence,
                    urgency_score,
                    ..
                } => Some((*confidence, *urgency_score)),
                AnalysisOutcome::Failure { .. } => None,
            })
            .collect();

        if successes.is_empty() {
            self.overall_confidence = None;
            self.confidence_band = None;
            self.max_urgency_score = None;
            self.overall_urgency = None;
        } else {
            #[allow(clippy::cast_precision_loss)]
            let mean = successes.iter().map(|(c, _)| c).sum::<f64>() / successes.len() as f64;
            let max_urgency = successes
                .iter()
                .map(|(_, u)| *u)
                .fold(0.0_f64, f64::max);
            self.overall_confidence = Some(mean);
            self.confidence_band = Some(confidence.band(mean));
            self.max_urgency_score = Some(max_urgency);
            self.overall_urgency = Some(urgency.level(max_urgency));
        }
        self.updated_at = Some(Utc::now());
    }

    /// Fold a stream event into the diagnosis slot.
    pub fn apply_stream_event(
        &mut self,
        event: &StreamEvent,
        confidence: &ConfidenceThresholds,
        urgency: &UrgencyThresholds,
    ) {
        self.outcomes.insert(
            AnalysisKind::Diagnosis,
            AnalysisOutcome::from_body(event.payload.clone(), urgency),
        );
        self.last_stream_sequence = Some(event.sequence);
        self.recompute(confidence, urgency);
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.len() - self.success_count()
    }

    /// True when at least one kind was dispatched and none succeeded.
    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.success_count() == 0
    }
}

impl Default for AggregateAnalysis {
    fn default() -> Self {
        Self::empty()
    }
}
