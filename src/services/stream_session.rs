//! Single long-lived stream connection per subject.
//!
//! `StreamSession::open` closes whatever handle is active before it opens the
//! next one, so a subject never has two live connections. Incoming transport
//! messages are numbered and forwarded to a [`StreamObserver`]; a terminated
//! stream reports exactly one of `on_error` or `on_close`, after which nothing
//! else is delivered. Closing a handle explicitly reports neither.
//!
//! The session reports `Opening` while the transport connects and `Errored`
//! if that connect fails; afterwards it reports the active handle's state.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::lock;
use crate::domain::errors::{AnalysisError, AnalysisResult};
use crate::domain::models::{StreamEvent, StreamState, SubjectId};
use crate::domain::ports::{StreamControl, StreamItem, StreamTransport};

/// Receiver of stream callbacks.
pub trait StreamObserver: Send + Sync {
    fn on_message(&self, event: StreamEvent);
    fn on_error(&self, error: AnalysisError);
    fn on_close(&self);
}

struct HandleShared {
    state: Mutex<StreamState>,
    control: Arc<dyn StreamControl>,
    /// Set once the caller closed the handle; silences every callback
    closed_by_caller: AtomicBool,
    /// Guards the single call to `control.close()`
    released: AtomicBool,
}

impl HandleShared {
    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.control.close();
        }
    }

    fn silenced(&self) -> bool {
        self.closed_by_caller.load(Ordering::SeqCst)
    }

    /// Move to a terminal state on behalf of the transport.
    /// Returns false if the handle already terminated or was closed.
    fn terminate(&self, terminal: StreamState) -> bool {
        if self.silenced() {
            return false;
        }
        let mut state = lock(&self.state);
        if state.is_terminal() {
            return false;
        }
        *state = terminal;
        true
    }
}

/// Caller-side handle on an open stream.
#[derive(Clone)]
pub struct StreamHandle {
    id: Uuid,
    subject: SubjectId,
    shared: Arc<HandleShared>,
    pump: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("subject", &self.subject)
            .field("state", &self.state())
            .finish()
    }
}

impl StreamHandle {
    fn start(
        subject: SubjectId,
        messages: mpsc::Receiver<StreamItem>,
        control: Arc<dyn StreamControl>,
        observer: Arc<dyn StreamObserver>,
    ) -> Self {
        let handle = Self {
            id: Uuid::new_v4(),
            subject,
            shared: Arc::new(HandleShared {
                state: Mutex::new(StreamState::Open),
                control,
                closed_by_caller: AtomicBool::new(false),
                released: AtomicBool::new(false),
            }),
            pump: Arc::new(Mutex::new(None)),
        };

        let task = tokio::spawn(pump(
            handle.id,
            Arc::clone(&handle.shared),
            messages,
            observer,
        ));
        *lock(&handle.pump) = Some(task);
        handle
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }

    pub fn state(&self) -> StreamState {
        *lock(&self.shared.state)
    }

    pub fn is_active(&self) -> bool {
        !self.state().is_terminal()
    }

    /// Close the stream. Idempotent, and safe after the stream already ended.
    pub fn close(&self) {
        if self.shared.closed_by_caller.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = lock(&self.pump).take() {
            task.abort();
        }
        {
            let mut state = lock(&self.shared.state);
            if !state.is_terminal() {
                *state = StreamState::Closed;
            }
        }
        self.shared.release();
        debug!(subject = %self.subject, stream_id = %self.id, "stream closed by caller");
    }
}

async fn pump(
    stream_id: Uuid,
    shared: Arc<HandleShared>,
    mut messages: mpsc::Receiver<StreamItem>,
    observer: Arc<dyn StreamObserver>,
) {
    let mut sequence: u64 = 0;

    loop {
        let item = messages.recv().await;
        if shared.silenced() {
            return;
        }

        let message = match item {
            None => {
                if shared.terminate(StreamState::Closed) {
                    shared.release();
                    debug!(%stream_id, "stream ended by remote side");
                    observer.on_close();
                }
                return;
            }
            Some(Ok(message)) => message,
            Some(Err(AnalysisError::Parse(reason))) => {
                warn!(%stream_id, %reason, "dropping malformed stream message");
                continue;
            }
            Some(Err(err)) => {
                fail(stream_id, &shared, observer.as_ref(), err);
                return;
            }
        };

        match message.classify() {
            Ok(kind) => {
                sequence += 1;
                observer.on_message(StreamEvent {
                    sequence,
                    kind,
                    payload: message.data,
                });
            }
            Err(AnalysisError::Parse(reason)) => {
                warn!(%stream_id, %reason, "dropping unrecognised stream message");
            }
            Err(err) => {
                fail(stream_id, &shared, observer.as_ref(), err);
                return;
            }
        }
    }
}

fn fail(stream_id: Uuid, shared: &HandleShared, observer: &dyn StreamObserver, err: AnalysisError) {
    if shared.terminate(StreamState::Errored) {
        shared.release();
        warn!(%stream_id, error = %err, "stream failed");
        observer.on_error(err);
    }
}

/// Owner of the at-most-one active stream for a subject.
pub struct StreamSession {
    subject: SubjectId,
    transport: Arc<dyn StreamTransport>,
    current: Mutex<Option<StreamHandle>>,
    /// State of an open attempt that has not produced a handle
    attempt: Mutex<Option<StreamState>>,
    /// Serializes opens so two callers cannot both end up with a live stream
    open_lock: tokio::sync::Mutex<()>,
}

impl StreamSession {
    pub fn new(subject: SubjectId, transport: Arc<dyn StreamTransport>) -> Self {
        Self {
            subject,
            transport,
            current: Mutex::new(None),
            attempt: Mutex::new(None),
            open_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Open a stream, closing the active one first.
    ///
    /// A failed open leaves no active stream behind.
    #[instrument(skip(self, payload, observer), fields(subject = %self.subject))]
    pub async fn open(
        &self,
        payload: &Value,
        observer: Arc<dyn StreamObserver>,
    ) -> AnalysisResult<StreamHandle> {
        let _opening = self.open_lock.lock().await;

        let previous = lock(&self.current).take();
        if let Some(previous) = previous {
            debug!(stream_id = %previous.id(), "closing previous stream before reopening");
            previous.close();
        }

        *lock(&self.attempt) = Some(StreamState::Opening);
        let connection = match self.transport.open_stream(&self.subject, payload).await {
            Ok(connection) => connection,
            Err(err) => {
                warn!(error = %err, "failed to open stream");
                *lock(&self.attempt) = Some(StreamState::Errored);
                return Err(err);
            }
        };

        let handle = StreamHandle::start(
            self.subject.clone(),
            connection.messages,
            connection.control,
            observer,
        );
        *lock(&self.current) = Some(handle.clone());
        *lock(&self.attempt) = None;
        info!(stream_id = %handle.id(), "stream opened");
        Ok(handle)
    }

    /// Close `handle`, forgetting it if it is the active one.
    pub fn close(&self, handle: &StreamHandle) {
        {
            let mut current = lock(&self.current);
            if current.as_ref().is_some_and(|active| active.id() == handle.id()) {
                current.take();
            }
        }
        handle.close();
    }

    /// Close whatever stream is active. Returns true if there was one.
    pub fn close_active(&self) -> bool {
        let active = lock(&self.current).take();
        match active {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    /// `Opening` during a connect, `Errored` after a failed one, otherwise
    /// the state of the most recent handle. `None` before the first open
    /// and after an explicit close.
    pub fn state(&self) -> Option<StreamState> {
        if let Some(handle) = lock(&self.current).as_ref() {
            return Some(handle.state());
        }
        *lock(&self.attempt)
    }

    /// The active handle, if its stream has not terminated.
    pub fn active(&self) -> Option<StreamHandle> {
        lock(&self.current)
            .as_ref()
            .filter(|handle| handle.is_active())
            .cloned()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.current).take() {
            handle.close();
        }
    }
}
