use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

/// Marker embedded in the bot's welcome message once the asker resolves the thread.
pub const SOLVED_MARKER: &str = "✅ *Marked as solved";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    Unsolved,
    Solved,
}

impl ThreadState {
    /// Derives the state from rendered message text. Messages edited by an earlier
    /// process only carry the marker, so this stays the fallback for unknown threads.
    pub fn from_message_text(text: &str) -> Self {
        if text.contains(SOLVED_MARKER) {
            Self::Solved
        } else {
            Self::Unsolved
        }
    }

    pub fn can_transition_to(self, next: ThreadState) -> bool {
        matches!((self, next), (Self::Unsolved, Self::Solved))
    }
}

/// Entries kept by [`ResolutionLog::new`] before the oldest are evicted.
pub const DEFAULT_RESOLUTION_CAPACITY: usize = 10_000;

/// Process-local record of thread resolutions keyed by the bot message timestamp.
///
/// Bounded: evicted threads fall back to the marker text, which an edited message
/// always carries.
#[derive(Debug)]
pub struct ResolutionLog {
    capacity: usize,
    inner: Mutex<Resolutions>,
}

#[derive(Debug, Default)]
struct Resolutions {
    states: HashMap<String, ThreadState>,
    order: VecDeque<String>,
}

impl Default for ResolutionLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RESOLUTION_CAPACITY)
    }
}

impl ResolutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), inner: Mutex::new(Resolutions::default()) }
    }

    fn lock(&self) -> MutexGuard<'_, Resolutions> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Local record first, marker text second.
    pub fn state_of(&self, message_ts: &str, message_text: &str) -> ThreadState {
        let recorded = self.lock().states.get(message_ts).copied();
        recorded.unwrap_or_else(|| ThreadState::from_message_text(message_text))
    }

    /// Returns `false` when the thread was already solved.
    pub fn mark_solved(&self, message_ts: &str) -> bool {
        let mut inner = self.lock();
        let current = inner.states.get(message_ts).copied().unwrap_or(ThreadState::Unsolved);
        if !current.can_transition_to(ThreadState::Solved) {
            return false;
        }

        while inner.order.len() >= self.capacity {
            let Some(oldest) = inner.order.pop_front() else { break };
            inner.states.remove(&oldest);
        }
        inner.states.insert(message_ts.to_owned(), ThreadState::Solved);
        inner.order.push_back(message_ts.to_owned());
        true
    }

    /// Drops a claim made by [`ResolutionLog::mark_solved`] whose message edit failed.
    pub fn release(&self, message_ts: &str) {
        let mut inner = self.lock();
        if inner.states.remove(message_ts).is_some() {
            inner.order.retain(|ts| ts != message_ts);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
