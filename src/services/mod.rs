//! Orchestration services.
//!
//! Leaves first: `debounce_gate` and `retrying_transport` are used by
//! `request_fanout` and `stream_session`, which `analysis_session` ties
//! together; `session_registry` owns the sessions.

pub mod analysis_session;
pub mod clinical_payload;
pub mod context_cache;
pub mod debounce_gate;
pub mod request_fanout;
pub mod retrying_transport;
pub mod session_registry;
pub mod stream_session;

pub use analysis_session::{
    AnalysisSession, SessionListener, SessionServices, SessionSettings, Subscription,
};
pub use clinical_payload::ClinicalPayloadBuilder;
pub use context_cache::ContextCache;
pub use debounce_gate::DebounceGate;
pub use request_fanout::RequestFanout;
pub use retrying_transport::{RetryPolicy, RetryingTransport};
pub use session_registry::SessionRegistry;
pub use stream_session::{StreamHandle, StreamObserver, StreamSession};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the guard if a panicking holder poisoned it.
///
/// These mutexes only guard plain state and are never held across an await.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
