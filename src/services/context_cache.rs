//! Per-subject history that outlives the session holding it.
//!
//! Released sessions park their history here so that a session recreated for
//! the same subject starts from the previous results. The number of subjects
//! is bounded; the least recently used subject is dropped first.

use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use super::lock;
use crate::domain::models::{AggregateAnalysis, History, SubjectId};

struct CachedHistory {
    entries: Vec<AggregateAnalysis>,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<SubjectId, CachedHistory>,
    clock: u64,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Bounded history cache keyed by subject.
pub struct ContextCache {
    capacity: usize,
    max_subjects: usize,
    state: Mutex<CacheState>,
}

impl ContextCache {
    /// `capacity` bounds the entries kept per subject, `max_subjects` the
    /// number of subjects.
    pub fn new(capacity: usize, max_subjects: usize) -> Self {
        Self {
            capacity,
            max_subjects,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Park a session's history. An empty history removes the entry.
    pub fn store(&self, subject: &SubjectId, history: &History) {
        let mut state = lock(&self.state);
        if history.is_empty() || self.max_subjects == 0 {
            state.entries.remove(subject);
            return;
        }
        let kept: Vec<AggregateAnalysis> = history
            .iter()
            .skip(history.len().saturating_sub(self.capacity))
            .cloned()
            .collect();
        let last_used = state.tick();
        state.entries.insert(
            subject.clone(),
            CachedHistory {
                entries: kept,
                last_used,
            },
        );

        while state.entries.len() > self.max_subjects {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, cached)| cached.last_used)
                .map(|(subject, _)| subject.clone());
            let Some(oldest) = oldest else { break };
            state.entries.remove(&oldest);
            debug!(subject = %oldest, "cached history evicted");
        }
    }

    /// History to seed a new session with; empty if nothing was cached.
    pub fn restore(&self, subject: &SubjectId) -> History {
        let mut state = lock(&self.state);
        let tick = state.tick();
        let cached = match state.entries.get_mut(subject) {
            Some(cached) => {
                cached.last_used = tick;
                cached.entries.clone()
            }
            None => Vec::new(),
        };
        History::from_entries(self.capacity, cached)
    }

    pub fn remove(&self, subject: &SubjectId) -> bool {
        lock(&self.state).entries.remove(subject).is_some()
    }

    pub fn contains(&self, subject: &SubjectId) -> bool {
        lock(&self.state).entries.contains_key(subject)
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).entries.is_empty()
    }
}
