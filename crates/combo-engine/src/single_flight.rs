//! # Single-Flight Guard
//!
//! At most one job per key at a time; different keys run in parallel.
//!
//! ```text
//! task A: try_acquire("b-1") → Some(guard)   ── runs ──► drop(guard)
//! task B: try_acquire("b-1") → None          (skipped, logged at debug)
//! task C: try_acquire("b-2") → Some(guard)   ── runs in parallel with A
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Set of keys with a job in flight.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Releases its key when dropped.
#[derive(Debug)]
pub struct FlightGuard {
    key: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `key`, or returns `None` if a job for it is already running.
    pub fn try_acquire(&self, key: &str) -> Option<FlightGuard> {
        let mut set = lock(&self.in_flight);
        if !set.insert(key.to_string()) {
            return None;
        }
        Some(FlightGuard {
            key: key.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        lock(&self.in_flight).contains(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FlightGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.key);
    }
}

// The set holds no invariant a panicking holder could break.
fn lock(set: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
