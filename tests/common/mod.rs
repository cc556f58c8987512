//! Common test utilities for integration tests
//!
//! Provides a registry wired to the scripted transports, a snapshot
//! recorder and clinical input fixtures.

#![allow(dead_code)]

use clinical_orchestrator::adapters::{MockStreamTransport, MockTransport};
use clinical_orchestrator::services::{AnalysisSession, ClinicalPayloadBuilder, SessionRegistry, Subscription};
use clinical_orchestrator::{ClinicalInput, Config, SessionSnapshot, SessionState};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Registry plus handles on the mocks behind it
pub struct TestRig {
    pub registry: Arc<SessionRegistry>,
    pub transport: Arc<MockTransport>,
    pub streams: Arc<MockStreamTransport>,
}

impl TestRig {
    pub fn new() -> Self {
        Self::with_config(&Config::default())
    }

    pub fn with_config(config: &Config) -> Self {
        let transport = Arc::new(MockTransport::new());
        let streams = Arc::new(MockStreamTransport::new());
        let registry = Arc::new(SessionRegistry::new(
            config,
            transport.clone(),
            streams.clone(),
            Arc::new(ClinicalPayloadBuilder::new()),
        ));
        Self {
            registry,
            transport,
            streams,
        }
    }
}

/// Collects every snapshot a session publishes
pub struct Recorder {
    snapshots: Arc<Mutex<Vec<SessionSnapshot>>>,
    subscription: Option<Subscription>,
}

impl Recorder {
    pub fn attach(session: &AnalysisSession) -> Self {
        let snapshots = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&snapshots);
        let subscription = session.subscribe(move |snapshot| {
            sink.lock().unwrap().push(snapshot.clone());
        });
        Self {
            snapshots,
            subscription: Some(subscription),
        }
    }

    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.snapshots().iter().map(|s| s.state).collect()
    }

    pub fn last(&self) -> Option<SessionSnapshot> {
        self.snapshots.lock().unwrap().last().cloned()
    }

    pub fn detach(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

/// Context with data for all six analysis kinds, minus the notes.
pub fn full_context() -> ClinicalInput {
    ClinicalInput {
        notes: String::new(),
        symptoms: vec!["fatigue".into(), "polyuria".into()],
        medications: vec!["lisinopril".into(), "metformin".into()],
        lab_results: vec![json!({"test_name": "HbA1c", "value": 8.1, "unit": "%"})],
        imaging_results: vec![json!({"type": "renal ultrasound", "findings": "normal"})],
        patient_history: json!({"conditions": ["hypertension"]}),
    }
}

pub fn full_input(notes: &str) -> ClinicalInput {
    full_context().with_notes(notes)
}

/// Let spawned tasks run. Under a paused clock this also auto-advances time.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
