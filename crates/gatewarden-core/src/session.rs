//! Step-up session flags: remembers that a subject satisfied the second
//! factor, for a bounded window.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::types::SubjectId;

/// TTL-bounded per-subject step-up flags. `satisfied` is true iff an
/// `assert_for` happened within the last `ttl`. Re-asserting extends the
/// window from now, it never shortens it retroactively.
#[derive(Debug, Default)]
pub struct StepUpStore {
    inner: RwLock<HashMap<SubjectId, Instant>>,
}

impl StepUpStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assert_for(&self, subject: &SubjectId, ttl: Duration) {
        let expiry = Instant::now() + ttl;
        let mut map = self.inner.write().unwrap();
        map.insert(subject.clone(), expiry);
    }

    pub fn satisfied(&self, subject: &SubjectId) -> bool {
        let map = self.inner.read().unwrap();
        map.get(subject).is_some_and(|expiry| *expiry > Instant::now())
    }

    /// Drop expired entries. Called opportunistically; correctness never
    /// depends on it because `satisfied` checks the expiry itself.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        let mut map = self.inner.write().unwrap();
        map.retain(|_, expiry| *expiry > now);
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
