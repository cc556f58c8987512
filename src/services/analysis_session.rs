//! Per-subject analysis orchestrator.
//!
//! An [`AnalysisSession`] ties the debounce gate, the fan-out and the stream
//! session into one observable state machine:
//!
//! - `on_input_changed` schedules a debounced trigger (or cancels it for
//!   near-empty input)
//! - `trigger_now` bumps the generation and dispatches a fan-out; a result
//!   is applied only if its generation is still current
//! - `start_stream`/`stop_stream` manage the subject's single stream
//! - `clear` cancels everything pending and empties the current aggregate
//!
//! Observers receive a full [`SessionSnapshot`] after every transition.
//! Notifications are always sent after the session lock is released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::debounce_gate::DebounceGate;
use super::lock;
use super::request_fanout::RequestFanout;
use super::stream_session::{StreamHandle, StreamObserver, StreamSession};
use crate::domain::errors::{AnalysisError, AnalysisResult};
use crate::domain::models::{
    AggregateAnalysis, ClinicalInput, Config, ConfidenceThresholds, History, SessionSnapshot,
    SessionState, StreamEvent, StreamEventKind, SubjectId, UrgencyThresholds,
};
use crate::domain::ports::{PayloadBuilder, StreamTransport};

/// Callback receiving session snapshots.
pub type SessionListener = Arc<dyn Fn(&SessionSnapshot) + Send + Sync>;

type ListenerList = Mutex<Vec<(u64, SessionListener)>>;

/// Tunables a session reads from the configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub debounce: Duration,
    pub min_input_length: usize,
    pub history_size: usize,
    pub confidence: ConfidenceThresholds,
    pub urgency: UrgencyThresholds,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            debounce: Duration::from_millis(config.debounce_ms),
            min_input_length: config.min_input_length,
            history_size: config.history_size,
            confidence: config.confidence_thresholds,
            urgency: config.urgency_thresholds,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Collaborators shared by every session of a registry.
#[derive(Clone)]
pub struct SessionServices {
    pub fanout: RequestFanout,
    pub streams: Arc<dyn StreamTransport>,
    pub payloads: Arc<dyn PayloadBuilder>,
}

/// Handle returned by [`AnalysisSession::subscribe`].
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Subscription {
    /// Stop receiving snapshots. Safe after the session is gone.
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock(&listeners).retain(|(id, _)| *id != self.id);
        }
    }
}

struct InFlight {
    generation: u64,
    task: AbortHandle,
}

struct SessionCore {
    state: SessionState,
    generation: u64,
    aggregate: AggregateAnalysis,
    history: History,
    input: ClinicalInput,
    in_flight: Option<InFlight>,
    /// Bumped on clear and shutdown; a debounce firing from an older epoch
    /// is dropped
    input_epoch: u64,
    /// Bumped whenever stream callbacks must stop being honoured
    stream_epoch: u64,
    active_stream: Option<StreamHandle>,
    last_error: Option<String>,
    last_activity: Instant,
    released: bool,
}

impl SessionCore {
    fn snapshot(&self, subject: &SubjectId) -> SessionSnapshot {
        SessionSnapshot {
            subject: subject.clone(),
            state: self.state,
            generation: self.generation,
            aggregate: self.aggregate.clone(),
            history: self.history.to_vec(),
            in_flight_generation: self.in_flight.as_ref().map(|f| f.generation),
            active_stream: self.active_stream.as_ref().map(StreamHandle::id),
            last_error: self.last_error.clone(),
        }
    }

    /// State to fall back to once a stream stops. A dispatch that failed
    /// outright while the stream was open still surfaces as `Errored`.
    fn resting_state(&self) -> SessionState {
        if self.in_flight.is_some() {
            SessionState::Dispatching
        } else if self.aggregate.all_failed() {
            SessionState::Errored
        } else {
            SessionState::Idle
        }
    }

    fn settle_after_stream(&mut self) {
        self.state = self.resting_state();
        if self.state == SessionState::Errored && self.last_error.is_none() {
            self.last_error = Some(failure_summary(&self.aggregate));
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

struct SessionInner {
    subject: SubjectId,
    settings: SessionSettings,
    fanout: RequestFanout,
    payloads: Arc<dyn PayloadBuilder>,
    streams: StreamSession,
    debounce: DebounceGate<(String, u64)>,
    core: Mutex<SessionCore>,
    listeners: Arc<ListenerList>,
    next_listener: AtomicU64,
}

/// Per-subject analysis state machine. Cloning yields another handle on the
/// same session.
#[derive(Clone)]
pub struct AnalysisSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for AnalysisSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisSession")
            .field("subject", &self.inner.subject)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AnalysisSession {
    pub fn new(
        subject: SubjectId,
        settings: SessionSettings,
        services: SessionServices,
        history: History,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<SessionInner>| {
            let weak = weak.clone();
            let debounce = DebounceGate::new(move |(text, epoch): (String, u64)| {
                if let Some(inner) = weak.upgrade() {
                    Self { inner }.fire_debounced(text, epoch);
                }
            });

            SessionInner {
                streams: StreamSession::new(subject.clone(), services.streams),
                subject,
                fanout: services.fanout,
                payloads: services.payloads,
                debounce,
                core: Mutex::new(SessionCore {
                    state: SessionState::Idle,
                    generation: 0,
                    aggregate: AggregateAnalysis::empty(),
                    history,
                    input: ClinicalInput::default(),
                    in_flight: None,
                    input_epoch: 0,
                    stream_epoch: 0,
                    active_stream: None,
                    last_error: None,
                    last_activity: Instant::now(),
                    released: false,
                }),
                settings,
                listeners: Arc::new(Mutex::new(Vec::new())),
                next_listener: AtomicU64::new(1),
            }
        });
        Self { inner }
    }

    pub fn subject(&self) -> &SubjectId {
        &self.inner.subject
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner.core).state
    }

    pub fn generation(&self) -> u64 {
        lock(&self.inner.core).generation
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        lock(&self.inner.core).snapshot(&self.inner.subject)
    }

    pub fn history(&self) -> History {
        lock(&self.inner.core).history.clone()
    }

    pub fn context(&self) -> ClinicalInput {
        lock(&self.inner.core).input.clone()
    }

    /// Replace the clinical context used by later triggers.
    pub fn set_context(&self, input: ClinicalInput) {
        let mut core = lock(&self.inner.core);
        core.input = input;
        core.touch();
    }

    /// Dispatching or streaming.
    pub fn is_busy(&self) -> bool {
        let core = lock(&self.inner.core);
        core.state.is_busy() || core.in_flight.is_some()
    }

    pub fn idle_for(&self) -> Duration {
        lock(&self.inner.core).last_activity.elapsed()
    }

    pub fn debounce_pending(&self) -> bool {
        self.inner.debounce.is_pending()
    }

    /// True once the registry released this session. Every later trigger
    /// is ignored and streams cannot be opened.
    pub fn is_released(&self) -> bool {
        lock(&self.inner.core).released
    }

    /// Receive a snapshot after every state transition.
    pub fn subscribe(
        &self,
        listener: impl Fn(&SessionSnapshot) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners).push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.inner.listeners),
        }
    }

    /// Debounced entry point for free-text input.
    ///
    /// Text shorter than the minimum length (trimmed, in characters) cancels
    /// any pending trigger instead of scheduling one.
    pub fn on_input_changed(&self, text: &str) {
        let length = text.trim().chars().count();
        let long_enough = length >= self.inner.settings.min_input_length;
        let epoch = {
            let mut core = lock(&self.inner.core);
            if core.released {
                debug!(subject = %self.inner.subject, "input ignored; session released");
                return;
            }
            core.touch();
            if !long_enough {
                core.input_epoch += 1;
            }
            core.input_epoch
        };

        if long_enough {
            self.inner
                .debounce
                .schedule((text.to_string(), epoch), self.inner.settings.debounce);
        } else {
            debug!(subject = %self.inner.subject, length, "input below minimum; debounce cancelled");
            self.inner.debounce.cancel();
        }
    }

    /// Debounce callback. The epoch check and the trigger share one lock so
    /// a concurrent `clear` either wins outright or comes after the trigger.
    fn fire_debounced(&self, text: String, epoch: u64) {
        let inner = &self.inner;
        let triggered = {
            let mut core = lock(&inner.core);
            if core.released || core.input_epoch != epoch {
                debug!(subject = %inner.subject, epoch, "debounced input cancelled");
                return;
            }
            let input = core.input.clone().with_notes(text);
            inner.begin_dispatch(&mut core, input)
        };
        inner.announce_dispatch(triggered);
    }

    /// Dispatch immediately, bypassing the debounce. Returns the generation
    /// assigned to this trigger.
    ///
    /// A dispatch already in flight keeps running, but its result will be
    /// discarded. A released session dispatches nothing and returns its last
    /// generation. Must be called from within a tokio runtime.
    #[instrument(skip(self, input), fields(subject = %self.inner.subject))]
    pub fn trigger_now(&self, input: ClinicalInput) -> u64 {
        let inner = &self.inner;
        let triggered = {
            let mut core = lock(&inner.core);
            if core.released {
                warn!("trigger ignored; session released");
                return core.generation;
            }
            inner.begin_dispatch(&mut core, input)
        };
        inner.announce_dispatch(triggered)
    }

    /// Open the subject's stream, closing any existing one first. Returns the
    /// new stream's identifier.
    #[instrument(skip(self, input), fields(subject = %self.inner.subject))]
    pub async fn start_stream(&self, input: ClinicalInput) -> AnalysisResult<Uuid> {
        let inner = &self.inner;
        let (epoch, payload) = {
            let mut core = lock(&inner.core);
            if core.released {
                return Err(AnalysisError::SessionReleased(inner.subject.to_string()));
            }
            core.input = input;
            core.stream_epoch += 1;
            core.active_stream = None;
            core.touch();
            (
                core.stream_epoch,
                inner.payloads.stream_payload(&inner.subject, &core.input),
            )
        };

        let observer = Arc::new(SessionStreamObserver {
            inner: Arc::downgrade(inner),
            epoch,
        });

        match inner.streams.open(&payload, observer).await {
            Ok(handle) => {
                let snapshot = {
                    let mut core = lock(&inner.core);
                    if core.stream_epoch != epoch {
                        Err(AnalysisError::CancelledByGeneration {
                            stale: epoch,
                            current: core.stream_epoch,
                        })
                    } else if !handle.is_active() {
                        // Already ended; its close or error callback owns
                        // the state transition.
                        return Ok(handle.id());
                    } else {
                        core.active_stream = Some(handle.clone());
                        core.state = SessionState::Streaming;
                        core.last_error = None;
                        Ok(core.snapshot(&inner.subject))
                    }
                };
                match snapshot {
                    Ok(snapshot) => {
                        inner.notify(&snapshot);
                        Ok(handle.id())
                    }
                    Err(err) => {
                        debug!(error = %err, "stream opened after it was cancelled");
                        inner.streams.close(&handle);
                        Err(err)
                    }
                }
            }
            Err(err) => {
                let snapshot = {
                    let mut core = lock(&inner.core);
                    (core.stream_epoch == epoch).then(|| {
                        core.state = SessionState::Errored;
                        core.last_error = Some(err.to_string());
                        core.snapshot(&inner.subject)
                    })
                };
                if let Some(snapshot) = snapshot {
                    inner.notify(&snapshot);
                }
                Err(err)
            }
        }
    }

    /// Close the active stream, if any. No callbacks fire for it afterwards.
    pub fn stop_stream(&self) {
        let inner = &self.inner;
        let (handle, snapshot) = {
            let mut core = lock(&inner.core);
            core.stream_epoch += 1;
            let handle = core.active_stream.take();
            if handle.is_none() && core.state != SessionState::Streaming {
                return;
            }
            core.settle_after_stream();
            core.touch();
            (handle, core.snapshot(&inner.subject))
        };

        if let Some(handle) = handle {
            inner.streams.close(&handle);
        }
        info!(subject = %inner.subject, "stream stopped");
        inner.notify(&snapshot);
    }

    /// Cancel pending work and discard the current aggregate. History is
    /// kept. Idempotent: a second call changes nothing and notifies no one.
    pub fn clear(&self) {
        let inner = &self.inner;
        inner.debounce.cancel();

        let (handle, snapshot) = {
            let mut core = lock(&inner.core);
            core.input_epoch += 1;
            let changed = core.state != SessionState::Idle
                || !core.aggregate.is_empty()
                || core.in_flight.is_some()
                || core.active_stream.is_some()
                || core.last_error.is_some();
            if !changed {
                return;
            }

            // Advance rather than reset, so a late result from the aborted
            // dispatch can never match a future trigger.
            core.generation += 1;
            core.stream_epoch += 1;
            if let Some(in_flight) = core.in_flight.take() {
                in_flight.task.abort();
            }
            core.aggregate = AggregateAnalysis::empty();
            core.state = SessionState::Idle;
            core.last_error = None;
            core.touch();
            (core.active_stream.take(), core.snapshot(&inner.subject))
        };

        if let Some(handle) = handle {
            inner.streams.close(&handle);
        }
        debug!(subject = %inner.subject, "session cleared");
        inner.notify(&snapshot);
    }

    /// Empty the history, keeping the current aggregate.
    pub fn clear_history(&self) {
        let snapshot = {
            let mut core = lock(&self.inner.core);
            if core.history.is_empty() {
                return;
            }
            core.history.clear();
            core.snapshot(&self.inner.subject)
        };
        self.inner.notify(&snapshot);
    }

    /// Tear the session down: no timer, stream, dispatch result or listener
    /// callback survives this call. Returns the history for caching.
    pub fn shutdown(&self) -> History {
        let inner = &self.inner;
        inner.debounce.cancel();
        let (handle, history) = {
            let mut core = lock(&inner.core);
            core.released = true;
            core.generation += 1;
            core.input_epoch += 1;
            core.stream_epoch += 1;
            if let Some(in_flight) = core.in_flight.take() {
                in_flight.task.abort();
            }
            core.state = SessionState::Idle;
            (core.active_stream.take(), core.history.clone())
        };
        if let Some(handle) = handle {
            inner.streams.close(&handle);
        }
        inner.streams.close_active();
        lock(&inner.listeners).clear();
        debug!(subject = %inner.subject, "session shut down");
        history
    }
}

async fn run_dispatch(inner: Arc<SessionInner>, generation: u64, input: ClinicalInput) {
    let payloads = Arc::clone(&inner.payloads);
    let subject = inner.subject.clone();
    let aggregate = inner
        .fanout
        .dispatch(&subject, generation, |kind| {
            payloads.build(&subject, kind, &input)
        })
        .await;
    inner.complete_dispatch(aggregate);
}

fn failure_summary(aggregate: &AggregateAnalysis) -> String {
    format!(
        "all {} analyses failed for generation {}",
        aggregate.failure_count(),
        aggregate.generation
    )
}

impl SessionInner {
    /// Bump the generation and spawn its dispatch. Caller holds the core lock.
    fn begin_dispatch(
        self: &Arc<Self>,
        core: &mut SessionCore,
        input: ClinicalInput,
    ) -> (u64, SessionSnapshot) {
        core.generation += 1;
        let generation = core.generation;
        core.input = input.clone();
        if core.state != SessionState::Streaming {
            core.state = SessionState::Dispatching;
        }
        core.last_error = None;
        core.touch();

        if let Some(previous) = core.in_flight.as_ref() {
            debug!(
                superseded = previous.generation,
                generation, "new trigger supersedes in-flight dispatch"
            );
        }
        // Spawned under the lock so the task cannot complete before it is
        // recorded as in flight.
        let task = tokio::spawn(run_dispatch(Arc::clone(self), generation, input));
        core.in_flight = Some(InFlight {
            generation,
            task: task.abort_handle(),
        });
        (generation, core.snapshot(&self.subject))
    }

    fn announce_dispatch(&self, (generation, snapshot): (u64, SessionSnapshot)) -> u64 {
        info!(subject = %self.subject, generation, "analysis triggered");
        self.notify(&snapshot);
        generation
    }

    fn notify(&self, snapshot: &SessionSnapshot) {
        let listeners: Vec<SessionListener> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(snapshot);
        }
    }

    fn complete_dispatch(&self, aggregate: AggregateAnalysis) {
        let snapshot = {
            let mut core = lock(&self.core);
            if aggregate.generation != core.generation {
                let stale = AnalysisError::CancelledByGeneration {
                    stale: aggregate.generation,
                    current: core.generation,
                };
                debug!(subject = %self.subject, reason = %stale, "discarding dispatch result");
                return;
            }

            core.in_flight = None;
            let all_failed = aggregate.all_failed();
            if all_failed {
                let summary = failure_summary(&aggregate);
                warn!(subject = %self.subject, generation = aggregate.generation, "{}", summary);
                core.last_error = Some(summary);
            }
            if !aggregate.is_empty() {
                core.history.push(aggregate.clone());
            }
            core.aggregate = aggregate;
            if core.state != SessionState::Streaming {
                core.state = if all_failed {
                    SessionState::Errored
                } else {
                    SessionState::Idle
                };
            }
            core.touch();
            core.snapshot(&self.subject)
        };

        info!(
            subject = %self.subject,
            generation = snapshot.generation,
            state = %snapshot.state,
            "analysis settled"
        );
        self.notify(&snapshot);
    }

    fn stream_message(&self, epoch: u64, event: &StreamEvent) {
        let snapshot = {
            let mut core = lock(&self.core);
            if core.stream_epoch != epoch {
                return;
            }
            let core = &mut *core;
            core.aggregate
                .apply_stream_event(event, &self.settings.confidence, &self.settings.urgency);
            if event.kind == StreamEventKind::Final {
                core.history.push(core.aggregate.clone());
            }
            core.touch();
            core.snapshot(&self.subject)
        };
        self.notify(&snapshot);
    }

    fn stream_error(&self, epoch: u64, error: &AnalysisError) {
        let snapshot = {
            let mut core = lock(&self.core);
            if core.stream_epoch != epoch {
                return;
            }
            core.active_stream = None;
            core.state = SessionState::Errored;
            core.last_error = Some(error.to_string());
            core.snapshot(&self.subject)
        };
        warn!(subject = %self.subject, error = %error, "stream failed");
        self.notify(&snapshot);
    }

    fn stream_closed(&self, epoch: u64) {
        let snapshot = {
            let mut core = lock(&self.core);
            if core.stream_epoch != epoch {
                return;
            }
            core.active_stream = None;
            core.settle_after_stream();
            core.snapshot(&self.subject)
        };
        debug!(subject = %self.subject, "stream finished");
        self.notify(&snapshot);
    }
}

/// Routes stream callbacks into a session while its epoch is current.
struct SessionStreamObserver {
    inner: Weak<SessionInner>,
    epoch: u64,
}

impl StreamObserver for SessionStreamObserver {
    fn on_message(&self, event: StreamEvent) {
        if let Some(inner) = self.inner.upgrade() {
            inner.stream_message(self.epoch, &event);
        }
    }

    fn on_error(&self, error: AnalysisError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.stream_error(self.epoch, &error);
        }
    }

    fn on_close(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.stream_closed(self.epoch);
        }
    }
}
