//! Concurrent session storage
//!
//! Every session owns one [`SessionSlot`]. The slot's step lock serializes
//! the steps of that session; distinct sessions never contend. A generation
//! counter, bumped on every restart, lets a step that was overtaken by a
//! restart discover that its result is stale.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::state::SelectionState;

/// Identifier of one conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State and locks of one session
#[derive(Debug)]
pub struct SessionSlot {
    step: tokio::sync::Mutex<()>,
    state: Mutex<SelectionState>,
    generation: AtomicU64,
    touched: Mutex<Instant>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            step: tokio::sync::Mutex::new(()),
            state: Mutex::new(SelectionState::Idle),
            generation: AtomicU64::new(0),
            touched: Mutex::new(Instant::now()),
        }
    }

    /// Wait for exclusive use of this session for one step
    pub async fn begin_step(&self) -> tokio::sync::MutexGuard<'_, ()> {
        let guard = self.step.lock().await;
        self.touch();
        guard
    }

    /// Whether a step is currently running
    pub fn is_busy(&self) -> bool {
        self.step.try_lock().is_err()
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> SelectionState {
        self.state.lock().clone()
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Replace the state and invalidate any step in flight
    pub fn restart(&self, state: SelectionState) -> u64 {
        let mut current = self.state.lock();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *current = state;
        self.touch();
        generation
    }

    /// Store the result of a step started at `generation`
    ///
    /// Returns `false`, leaving the state alone, when a restart happened
    /// since.
    pub fn commit(&self, generation: u64, state: SelectionState) -> bool {
        let mut current = self.state.lock();
        if self.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        *current = state;
        self.touch();
        true
    }

    /// Time since the session was last used
    pub fn idle_for(&self) -> Duration {
        self.touched.lock().elapsed()
    }

    fn touch(&self) {
        *self.touched.lock() = Instant::now();
    }
}

/// Map of session id to session slot
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<SessionSlot>>,
    ttl: Duration,
}

impl SessionStore {
    /// Create an empty store evicting sessions idle longer than `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Fresh idle session, replacing any existing one
    pub fn create(&self, id: SessionId) -> Arc<SessionSlot> {
        let slot = Arc::new(SessionSlot::new());
        if let Some(previous) = self.sessions.insert(id, Arc::clone(&slot)) {
            // A step of the replaced session must not commit anywhere
            previous.restart(SelectionState::Idle);
        }
        slot
    }

    /// Existing session, or a new idle one
    ///
    /// The slot is touched while its map entry is locked, so eviction cannot
    /// remove it before the caller's step begins.
    pub fn get_or_create(&self, id: &SessionId) -> Arc<SessionSlot> {
        let entry = self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(SessionSlot::new()));
        entry.touch();
        Arc::clone(entry.value())
    }

    /// Existing session
    pub fn get(&self, id: &SessionId) -> Option<Arc<SessionSlot>> {
        self.sessions.get(id).map(|slot| Arc::clone(slot.value()))
    }

    /// Reset a session to idle, discarding any step in flight
    pub fn clear(&self, id: &SessionId) -> bool {
        match self.get(id) {
            Some(slot) => {
                slot.restart(SelectionState::Idle);
                true
            }
            None => false,
        }
    }

    /// Remove a session entirely
    pub fn destroy(&self, id: &SessionId) -> bool {
        match self.sessions.remove(id) {
            Some((_, slot)) => {
                slot.restart(SelectionState::Idle);
                true
            }
            None => false,
        }
    }

    /// Remove sessions idle longer than the TTL, returning how many went
    ///
    /// Sessions with a step in flight are kept.
    pub fn evict_idle(&self) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, slot| slot.is_busy() || slot.idle_for() < self.ttl);
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            debug!("Evicted {} idle sessions", evicted);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
