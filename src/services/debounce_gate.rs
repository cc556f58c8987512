//! Trailing-edge debounce for trigger intents.
//!
//! A burst of `schedule` calls collapses into a single `on_fire` invocation
//! carrying the last intent, no earlier than the configured delay after the
//! last call.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

use super::lock;

type FireFn<T> = dyn Fn(T) + Send + Sync;

#[derive(Default)]
struct PendingFire {
    /// Bumped on every schedule/cancel; a timer only fires if its token is current
    token: u64,
    timer: Option<JoinHandle<()>>,
}

/// Coalesces rapid trigger intents into one delayed firing.
pub struct DebounceGate<T> {
    on_fire: Arc<FireFn<T>>,
    pending: Arc<Mutex<PendingFire>>,
}

impl<T: Send + 'static> DebounceGate<T> {
    pub fn new(on_fire: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            on_fire: Arc::new(on_fire),
            pending: Arc::new(Mutex::new(PendingFire::default())),
        }
    }

    /// Record `intent` and restart the timer.
    ///
    /// Any previously scheduled intent is discarded. Must be called from
    /// within a tokio runtime.
    pub fn schedule(&self, intent: T, delay: Duration) {
        let mut pending = lock(&self.pending);
        pending.token += 1;
        let token = pending.token;
        if let Some(previous) = pending.timer.take() {
            previous.abort();
        }

        let on_fire = Arc::clone(&self.on_fire);
        let slot = Arc::clone(&self.pending);
        // The lock is held until the handle is stored, so the timer cannot
        // observe the slot before it is armed.
        pending.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let fire = {
                let mut pending = lock(&slot);
                if pending.token == token && pending.timer.is_some() {
                    pending.timer = None;
                    true
                } else {
                    false
                }
            };
            if fire {
                trace!(token, "debounce timer fired");
                on_fire(intent);
            }
        }));
    }

    /// Discard the pending timer without firing. Idempotent.
    pub fn cancel(&self) {
        let mut pending = lock(&self.pending);
        pending.token += 1;
        if let Some(timer) = pending.timer.take() {
            timer.abort();
            trace!("debounce timer cancelled");
        }
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.pending).timer.is_some()
    }
}

impl<T> Drop for DebounceGate<T> {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.pending).timer.take() {
            timer.abort();
        }
    }
}
