//! End-to-end session behavior through the public API, against scripted
//! transports and tokio's paused clock.

mod common;

use clinical_orchestrator::adapters::{ScriptedResponse, StreamLogEntry};
use clinical_orchestrator::{
    AnalysisError, AnalysisKind, AnalysisOutcome, ClinicalInput, Config, ErrorKind, SessionState,
    SubjectId,
};
use common::{full_context, full_input, settle, Recorder, TestRig};
use serde_json::json;
use std::time::Duration;
use tokio::time::{advance, Instant};

fn single_kind_config(kind: AnalysisKind) -> Config {
    Config {
        kinds: vec![kind],
        ..Config::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_debounce_coalesces_burst_into_trailing_trigger() {
    let rig = TestRig::new();
    let session = rig.registry.get(&SubjectId::from("100"));
    session.set_context(full_context());
    let start = Instant::now();

    session.on_input_changed("patient reports fatigue");
    advance(Duration::from_millis(200)).await;
    session.on_input_changed("patient reports fatigue and thirst");
    advance(Duration::from_millis(200)).await;
    session.on_input_changed("patient reports fatigue, thirst and polyuria");

    advance(Duration::from_millis(999)).await;
    assert_eq!(rig.transport.total_calls(), 0, "fired before the quiet period ended");

    advance(Duration::from_millis(1)).await;
    settle().await;

    assert_eq!(rig.transport.total_calls(), 6);
    let fired_at = rig.transport.call_times(AnalysisKind::Diagnosis)[0];
    assert_eq!(fired_at - start, Duration::from_millis(1400));

    let diagnosis = rig
        .transport
        .calls()
        .into_iter()
        .find(|call| call.kind == AnalysisKind::Diagnosis)
        .unwrap();
    assert_eq!(
        diagnosis.payload["current_notes"],
        json!("patient reports fatigue, thirst and polyuria")
    );
    assert_eq!(session.generation(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_short_input_cancels_pending_trigger() {
    let rig = TestRig::new();
    let session = rig.registry.get(&SubjectId::from("101"));

    session.on_input_changed("sharp pain in left knee");
    advance(Duration::from_millis(500)).await;
    session.on_input_changed("sharp");

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(rig.transport.total_calls(), 0);
    assert_eq!(session.generation(), 0);
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_partial_fanout_failure_keeps_session_idle() {
    let rig = TestRig::new();
    rig.transport.script(
        AnalysisKind::LabTests,
        vec![ScriptedResponse::Status(500, json!({"detail": "lab model offline"}))],
    );
    rig.transport.script(
        AnalysisKind::Imaging,
        vec![ScriptedResponse::TransportError("connection reset".into())],
    );
    let session = rig.registry.get(&SubjectId::from("102"));
    let recorder = Recorder::attach(&session);

    session.trigger_now(full_input("progressive shortness of breath"));
    settle().await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert_eq!(snapshot.aggregate.success_count(), 4);
    assert_eq!(snapshot.aggregate.failure_count(), 2);
    assert!(snapshot.last_error.is_none());

    match &snapshot.aggregate.outcomes[&AnalysisKind::LabTests] {
        AnalysisOutcome::Failure {
            error_kind,
            message,
        } => {
            assert_eq!(*error_kind, ErrorKind::EndpointError);
            assert!(message.contains("lab model offline"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(matches!(
        &snapshot.aggregate.outcomes[&AnalysisKind::Imaging],
        AnalysisOutcome::Failure {
            error_kind: ErrorKind::TransportError,
            ..
        }
    ));
    assert_eq!(
        recorder.states(),
        vec![SessionState::Dispatching, SessionState::Idle]
    );
}

#[tokio::test(start_paused = true)]
async fn test_total_fanout_failure_errors_session() {
    let rig = TestRig::new();
    rig.transport
        .script_all(&[ScriptedResponse::TransportError("connection refused".into())]);
    let session = rig.registry.get(&SubjectId::from("103"));

    session.trigger_now(full_input("new onset confusion in elderly patient"));
    settle().await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Errored);
    assert_eq!(snapshot.aggregate.failure_count(), 6);
    assert!(snapshot.last_error.is_some());

    // A later successful trigger recovers.
    rig.transport.script_all(&[ScriptedResponse::Ok(json!({"confidence": 0.7}))]);
    session.trigger_now(full_input("new onset confusion, afebrile"));
    settle().await;
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.snapshot().last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_retry_exhaustion() {
    let rig = TestRig::with_config(&single_kind_config(AnalysisKind::Diagnosis));
    rig.transport
        .script(AnalysisKind::Diagnosis, vec![ScriptedResponse::RateLimited]);
    let session = rig.registry.get(&SubjectId::from("104"));

    session.trigger_now(ClinicalInput::from_notes("chest tightness after exercise"));
    tokio::time::sleep(Duration::from_secs(5)).await;

    let times = rig.transport.call_times(AnalysisKind::Diagnosis);
    assert_eq!(times.len(), 3, "exactly max_attempts requests");
    assert_eq!(times[1] - times[0], Duration::from_millis(1000));
    assert_eq!(times[2] - times[1], Duration::from_millis(2000));

    let snapshot = session.snapshot();
    assert!(matches!(
        &snapshot.aggregate.outcomes[&AnalysisKind::Diagnosis],
        AnalysisOutcome::Failure {
            error_kind: ErrorKind::RateLimitExhausted,
            ..
        }
    ));
    assert_eq!(snapshot.state, SessionState::Errored);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_then_success() {
    let rig = TestRig::with_config(&single_kind_config(AnalysisKind::Diagnosis));
    rig.transport.script(
        AnalysisKind::Diagnosis,
        vec![
            ScriptedResponse::RateLimited,
            ScriptedResponse::Ok(json!({"confidence_score": 85.0, "urgency_level": "High"})),
        ],
    );
    let session = rig.registry.get(&SubjectId::from("105"));

    session.trigger_now(ClinicalInput::from_notes("palpitations and dizziness"));
    tokio::time::sleep(Duration::from_secs(2)).await;

    let aggregate = session.snapshot().aggregate;
    assert_eq!(rig.transport.call_count(AnalysisKind::Diagnosis), 2);
    assert_eq!(aggregate.success_count(), 1);
    assert!((aggregate.overall_confidence.unwrap() - 0.85).abs() < 1e-9);
    assert!((aggregate.max_urgency_score.unwrap() - 0.6).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_stale_generation_result_is_discarded() {
    let rig = TestRig::with_config(&single_kind_config(AnalysisKind::Diagnosis));
    rig.transport.script(
        AnalysisKind::Diagnosis,
        vec![
            ScriptedResponse::delayed(
                Duration::from_millis(500),
                ScriptedResponse::Ok(json!({"marker": "A", "confidence": 0.2})),
            ),
            ScriptedResponse::Ok(json!({"marker": "B", "confidence": 0.9})),
        ],
    );
    let session = rig.registry.get(&SubjectId::from("106"));
    let recorder = Recorder::attach(&session);

    let first = session.trigger_now(ClinicalInput::from_notes("first draft of the notes"));
    advance(Duration::from_millis(100)).await;
    let second = session.trigger_now(ClinicalInput::from_notes("second draft of the notes"));
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(second > first);
    let snapshot = session.snapshot();
    assert_eq!(snapshot.aggregate.generation, second);
    match &snapshot.aggregate.outcomes[&AnalysisKind::Diagnosis] {
        AnalysisOutcome::Success { payload, .. } => assert_eq!(payload["marker"], "B"),
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(snapshot.history.len(), 1);
    assert!(recorder
        .snapshots()
        .iter()
        .all(|s| s.aggregate.generation != first || s.aggregate.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn test_single_active_stream_per_subject() {
    let rig = TestRig::new();
    let session = rig.registry.get(&SubjectId::from("107"));
    let recorder = Recorder::attach(&session);

    let first = session
        .start_stream(ClinicalInput::from_notes("monitoring post-op vitals"))
        .await
        .unwrap();
    let second = session
        .start_stream(ClinicalInput::from_notes("monitoring post-op vitals, hour two"))
        .await
        .unwrap();

    assert_ne!(first, second);
    assert_eq!(
        rig.streams.log(),
        vec![
            StreamLogEntry::Opened(0),
            StreamLogEntry::Closed(0),
            StreamLogEntry::Opened(1),
        ]
    );
    assert_eq!(session.snapshot().active_stream, Some(second));

    // The superseded connection no longer reaches the session.
    let before = recorder.count();
    rig.streams
        .send_message(0, "final_analysis", json!({"confidence": 0.9}))
        .await;
    settle().await;
    assert_eq!(recorder.count(), before);
}

#[tokio::test(start_paused = true)]
async fn test_stream_events_fold_into_aggregate() {
    let rig = TestRig::new();
    let session = rig.registry.get(&SubjectId::from("108"));

    session
        .start_stream(ClinicalInput::from_notes("fever, neck stiffness, photophobia"))
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Streaming);

    rig.streams
        .send_message(0, "initial_analysis", json!({"confidence": 0.3}))
        .await;
    rig.streams
        .send(0, Err(AnalysisError::Parse("truncated frame".into())))
        .await;
    rig.streams
        .send_message(0, "progressive_insight", json!({"confidence": 0.6}))
        .await;
    rig.streams
        .send_message(
            0,
            "final_analysis",
            json!({"confidence": 0.92, "urgency_level": "Critical"}),
        )
        .await;
    settle().await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Streaming, "parse errors keep the stream open");
    assert_eq!(snapshot.aggregate.last_stream_sequence, Some(3));
    assert!((snapshot.aggregate.overall_confidence.unwrap() - 0.92).abs() < 1e-9);
    assert_eq!(snapshot.history.len(), 1);

    rig.streams.finish(0);
    settle().await;
    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert!(snapshot.active_stream.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stream_error_message_errors_session() {
    let rig = TestRig::new();
    let session = rig.registry.get(&SubjectId::from("109"));

    session
        .start_stream(ClinicalInput::from_notes("syncope while standing"))
        .await
        .unwrap();
    rig.streams
        .send_message(0, "error", json!("analysis pipeline crashed"))
        .await;
    settle().await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Errored);
    assert!(snapshot
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("analysis pipeline crashed")));
    assert!(snapshot.active_stream.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failed_open_errors_session() {
    let rig = TestRig::new();
    rig.streams
        .fail_next_open(AnalysisError::StreamTransport("503 Service Unavailable".into()));
    let session = rig.registry.get(&SubjectId::from("110"));

    let result = session
        .start_stream(ClinicalInput::from_notes("worsening headache"))
        .await;

    assert!(result.is_err());
    assert_eq!(session.state(), SessionState::Errored);
}

#[tokio::test(start_paused = true)]
async fn test_clear_and_stop_are_idempotent() {
    let rig = TestRig::new();
    let session = rig.registry.get(&SubjectId::from("111"));

    session.trigger_now(full_input("bilateral leg swelling for a week"));
    settle().await;
    session
        .start_stream(ClinicalInput::from_notes("bilateral leg swelling, follow-up"))
        .await
        .unwrap();
    session.on_input_changed("bilateral leg swelling, now with pain");

    let recorder = Recorder::attach(&session);
    session.clear();
    session.clear();
    session.stop_stream();
    settle().await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(recorder.count(), 1, "only the first clear notifies");
    assert_eq!(rig.streams.close_count(0), 1);
    assert!(!session.debounce_pending());

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert!(snapshot.aggregate.is_empty());
    assert!(snapshot.active_stream.is_none());
    assert_eq!(snapshot.history.len(), 1, "history survives clear");
    assert_eq!(rig.transport.total_calls(), 6, "debounced trigger was cancelled");
}

#[tokio::test(start_paused = true)]
async fn test_subjects_are_isolated_and_history_survives_release() {
    let rig = TestRig::new();
    let alice = SubjectId::from("200");
    let bob = SubjectId::from("201");

    rig.registry
        .get(&alice)
        .trigger_now(ClinicalInput::from_notes("rash on both forearms"));
    rig.registry
        .get(&bob)
        .start_stream(ClinicalInput::from_notes("tachycardia at rest"))
        .await
        .unwrap();
    settle().await;

    assert_eq!(rig.registry.subjects(), vec![alice.clone(), bob.clone()]);
    assert_eq!(rig.registry.get(&bob).state(), SessionState::Streaming);
    assert!(rig.registry.get(&bob).history().is_empty());

    assert!(rig.registry.release(&alice));
    assert_eq!(rig.registry.len(), 1);
    assert_eq!(rig.registry.get(&alice).history().len(), 1);

    rig.registry.release(&bob);
    assert_eq!(rig.streams.close_count(0), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribed_listener_receives_nothing() {
    let rig = TestRig::new();
    let session = rig.registry.get(&SubjectId::from("112"));
    let mut recorder = Recorder::attach(&session);

    session.trigger_now(ClinicalInput::from_notes("mild persistent cough"));
    settle().await;
    let seen = recorder.count();
    assert!(seen >= 2);

    recorder.detach();
    session.trigger_now(ClinicalInput::from_notes("mild persistent cough, now productive"));
    settle().await;
    assert_eq!(recorder.count(), seen);
}
