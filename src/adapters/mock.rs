//! Scripted transports for testing.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::domain::errors::{AnalysisError, AnalysisResult};
use crate::domain::models::{AnalysisKind, RawStreamMessage, SubjectId};
use crate::domain::ports::{
    RawResponse, StreamConnection, StreamControl, StreamItem, StreamTransport, Transport,
};
use crate::services::lock;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// 200 with the given body
    Ok(Value),
    /// Arbitrary status and body
    Status(u16, Value),
    /// 429
    RateLimited,
    /// No response at all
    TransportError(String),
    /// Wait, then reply with the inner response
    Delayed(Duration, Box<ScriptedResponse>),
}

impl ScriptedResponse {
    pub fn delayed(delay: Duration, response: Self) -> Self {
        Self::Delayed(delay, Box::new(response))
    }
}

/// Recorded call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub kind: AnalysisKind,
    pub payload: Value,
    pub at: Instant,
}

/// Transport replaying scripted responses per analysis kind.
///
/// Responses are consumed in order; the last one repeats once the script is
/// exhausted. Kinds without a script answer 200 with a canned body.
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<AnalysisKind, Vec<ScriptedResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
    cleared: Mutex<Vec<SubjectId>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the script for one kind.
    pub fn script(&self, kind: AnalysisKind, responses: Vec<ScriptedResponse>) {
        lock(&self.scripts).insert(kind, responses);
    }

    /// Script every kind with the same responses.
    pub fn script_all(&self, responses: &[ScriptedResponse]) {
        let mut scripts = lock(&self.scripts);
        for kind in AnalysisKind::ALL {
            scripts.insert(kind, responses.to_vec());
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, kind: AnalysisKind) -> usize {
        lock(&self.calls).iter().filter(|c| c.kind == kind).count()
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn call_times(&self, kind: AnalysisKind) -> Vec<Instant> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.at)
            .collect()
    }

    pub fn cleared_contexts(&self) -> Vec<SubjectId> {
        lock(&self.cleared).clone()
    }

    fn next_response(&self, kind: AnalysisKind) -> ScriptedResponse {
        let mut scripts = lock(&self.scripts);
        match scripts.get_mut(&kind) {
            Some(script) if script.len() > 1 => script.remove(0),
            Some(script) if !script.is_empty() => script[0].clone(),
            _ => ScriptedResponse::Ok(json!({
                "kind": kind.as_str(),
                "confidence": 0.8,
                "urgency_score": 0.3,
            })),
        }
    }

    async fn resolve(response: ScriptedResponse) -> AnalysisResult<RawResponse> {
        let mut response = response;
        loop {
            match response {
                ScriptedResponse::Ok(body) => return Ok(RawResponse::ok(body)),
                ScriptedResponse::Status(status, body) => return Ok(RawResponse::new(status, body)),
                ScriptedResponse::RateLimited => return Ok(RawResponse::rate_limited()),
                ScriptedResponse::TransportError(message) => {
                    return Err(AnalysisError::Transport(message))
                }
                ScriptedResponse::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    response = *inner;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, kind: AnalysisKind, payload: &Value) -> AnalysisResult<RawResponse> {
        lock(&self.calls).push(RecordedCall {
            kind,
            payload: payload.clone(),
            at: Instant::now(),
        });
        let response = self.next_response(kind);
        Self::resolve(response).await
    }

    async fn clear_context(&self, subject: &SubjectId) -> AnalysisResult<()> {
        lock(&self.cleared).push(subject.clone());
        Ok(())
    }
}

/// Entry in the mock stream transport's connection log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamLogEntry {
    Opened(usize),
    Closed(usize),
}

struct MockControl {
    index: usize,
    log: Arc<Mutex<Vec<StreamLogEntry>>>,
}

impl StreamControl for MockControl {
    fn close(&self) {
        // Every call is logged so tests can count them.
        lock(&self.log).push(StreamLogEntry::Closed(self.index));
    }
}

/// Stream transport whose connections are fed by the test.
#[derive(Default)]
pub struct MockStreamTransport {
    log: Arc<Mutex<Vec<StreamLogEntry>>>,
    senders: Mutex<Vec<Option<mpsc::Sender<StreamItem>>>>,
    payloads: Mutex<Vec<Value>>,
    fail_next_open: Mutex<Option<AnalysisError>>,
    open_delay: Mutex<Option<Duration>>,
}

impl MockStreamTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Vec<StreamLogEntry> {
        lock(&self.log).clone()
    }

    pub fn open_count(&self) -> usize {
        lock(&self.senders).len()
    }

    pub fn close_count(&self, index: usize) -> usize {
        lock(&self.log)
            .iter()
            .filter(|entry| **entry == StreamLogEntry::Closed(index))
            .count()
    }

    pub fn payloads(&self) -> Vec<Value> {
        lock(&self.payloads).clone()
    }

    pub fn fail_next_open(&self, err: AnalysisError) {
        *lock(&self.fail_next_open) = Some(err);
    }

    /// Make the next `open_stream` take `delay` before connecting.
    pub fn delay_next_open(&self, delay: Duration) {
        *lock(&self.open_delay) = Some(delay);
    }

    /// Deliver an item on connection `index`. Returns false if it is gone.
    pub async fn send(&self, index: usize, item: StreamItem) -> bool {
        let sender = lock(&self.senders).get(index).cloned().flatten();
        match sender {
            Some(sender) => sender.send(item).await.is_ok(),
            None => false,
        }
    }

    pub async fn send_message(&self, index: usize, message_type: &str, data: Value) -> bool {
        self.send(index, Ok(RawStreamMessage::new(message_type, data)))
            .await
    }

    /// End connection `index` from the remote side.
    pub fn finish(&self, index: usize) {
        if let Some(slot) = lock(&self.senders).get_mut(index) {
            slot.take();
        }
    }
}

#[async_trait]
impl StreamTransport for MockStreamTransport {
    async fn open_stream(
        &self,
        _subject: &SubjectId,
        payload: &Value,
    ) -> AnalysisResult<StreamConnection> {
        let delay = lock(&self.open_delay).take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = lock(&self.fail_next_open).take() {
            return Err(err);
        }

        let (tx, rx) = mpsc::channel(64);
        let index = {
            let mut senders = lock(&self.senders);
            senders.push(Some(tx));
            senders.len() - 1
        };
        lock(&self.payloads).push(payload.clone());
        lock(&self.log).push(StreamLogEntry::Opened(index));

        Ok(StreamConnection {
            messages: rx,
            control: Arc::new(MockControl {
                index,
                log: Arc::clone(&self.log),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_replays_in_order_then_repeats_last() {
        let mock = MockTransport::new();
        mock.script(
            AnalysisKind::Diagnosis,
            vec![
                ScriptedResponse::RateLimited,
                ScriptedResponse::Status(500, Value::Null),
            ],
        );

        let payload = json!({});
        let first = mock.request(AnalysisKind::Diagnosis, &payload).await.unwrap();
        let second = mock.request(AnalysisKind::Diagnosis, &payload).await.unwrap();
        let third = mock.request(AnalysisKind::Diagnosis, &payload).await.unwrap();

        assert!(first.is_rate_limited());
        assert_eq!(second.status, 500);
        assert_eq!(third.status, 500);
        assert_eq!(mock.call_count(AnalysisKind::Diagnosis), 3);
    }

    #[tokio::test]
    async fn test_unscripted_kind_succeeds() {
        let mock = MockTransport::new();
        let response = mock.request(AnalysisKind::Imaging, &json!({})).await.unwrap();
        assert!(response.ok);
        assert_eq!(response.body["kind"], "imaging");
    }

    #[tokio::test]
    async fn test_stream_connections_are_logged() {
        let mock = MockStreamTransport::new();
        let subject = SubjectId::from("p-1");

        let mut conn = mock.open_stream(&subject, &json!({"notes": "x"})).await.unwrap();
        assert!(mock.send_message(0, "initial", json!({})).await);
        let item = conn.messages.recv().await.unwrap().unwrap();
        assert_eq!(item.message_type, "initial");

        mock.finish(0);
        assert!(conn.messages.recv().await.is_none());

        conn.control.close();
        assert_eq!(
            mock.log(),
            vec![StreamLogEntry::Opened(0), StreamLogEntry::Closed(0)]
        );
    }
}
