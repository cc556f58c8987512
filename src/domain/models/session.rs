/// Domain models for per-subject analysis sessions.
///
/// A session snapshot is what the presentation layer receives: the current
/// state, the current aggregate and the bounded history of past aggregates.
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use super::analysis::{AggregateAnalysis, SubjectId};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No outcome yet, or the last operation finished
    Idle,
    /// A fan-out dispatch is in flight
    Dispatching,
    /// A stream connection is open and delivering events
    Streaming,
    /// Every leg of the last dispatch failed, or the stream failed
    Errored,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Dispatching => "dispatching",
            Self::Streaming => "streaming",
            Self::Errored => "errored",
        }
    }

    /// Busy sessions are never evicted for idleness.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Dispatching | Self::Streaming)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only ring buffer of past aggregates.
///
/// Entries are never mutated after they are pushed; once `capacity` is
/// reached the oldest entry is evicted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    capacity: usize,
    entries: VecDeque<AggregateAnalysis>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(64)),
        }
    }

    /// Rebuild from previously cached entries, keeping the newest `capacity`.
    pub fn from_entries(capacity: usize, entries: impl IntoIterator<Item = AggregateAnalysis>) -> Self {
        let mut history = Self::new(capacity);
        for entry in entries {
            history.push(entry);
        }
        history
    }

    pub fn push(&mut self, entry: AggregateAnalysis) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &AggregateAnalysis> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&AggregateAnalysis> {
        self.entries.back()
    }

    pub fn to_vec(&self) -> Vec<AggregateAnalysis> {
        self.entries.iter().cloned().collect()
    }
}

/// Full session view pushed to observers after every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub subject: SubjectId,
    pub state: SessionState,
    pub generation: u64,
    pub aggregate: AggregateAnalysis,
    /// Oldest first
    pub history: Vec<AggregateAnalysis>,
    /// Generation of the dispatch currently in flight, if any
    pub in_flight_generation: Option<u64>,
    /// Identifier of the open stream connection, if any
    pub active_stream: Option<Uuid>,
    /// Summary of the failure that moved the session to `Errored`
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entry(generation: u64) -> AggregateAnalysis {
        AggregateAnalysis {
            generation,
            ..AggregateAnalysis::empty()
        }
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = History::new(3);
        for generation in 1..=5 {
            history.push(entry(generation));
        }
        let generations: Vec<u64> = history.iter().map(|a| a.generation).collect();
        assert_eq!(generations, vec![3, 4, 5]);
        assert_eq!(history.latest().map(|a| a.generation), Some(5));
    }

    #[test]
    fn test_zero_capacity_history_stays_empty() {
        let mut history = History::new(0);
        history.push(entry(1));
        assert!(history.is_empty());
    }

    #[test]
    fn test_from_entries_keeps_newest() {
        let history = History::from_entries(2, (1..=4).map(entry));
        let generations: Vec<u64> = history.iter().map(|a| a.generation).collect();
        assert_eq!(generations, vec![3, 4]);
    }

    #[test]
    fn test_busy_states() {
        assert!(SessionState::Dispatching.is_busy());
        assert!(SessionState::Streaming.is_busy());
        assert!(!SessionState::Idle.is_busy());
        assert!(!SessionState::Errored.is_busy());
    }

    proptest! {
        #[test]
        fn prop_history_is_bounded_suffix(capacity in 0usize..30, pushes in 0u64..80) {
            let mut history = History::new(capacity);
            for generation in 0..pushes {
                history.push(entry(generation));
            }
            let expected_len = usize::try_from(pushes).unwrap().min(capacity);
            prop_assert_eq!(history.len(), expected_len);

            let generations: Vec<u64> = history.iter().map(|a| a.generation).collect();
            let expected: Vec<u64> = (pushes - expected_len as u64..pushes).collect();
            prop_assert_eq!(generations, expected);
        }
    }
}
