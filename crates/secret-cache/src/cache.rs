//! TTL cache with single-use `take` and queued eviction records
//!
//! All state sits behind one `std::sync::Mutex`. Critical sections are short
//! map operations only; cleanup I/O happens on the records returned by
//! `sweep`/`drain`, after the guard is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use common::Secret;
use tracing::debug;

use crate::clock::{Clock, SystemClock};

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Removed by a successful `take`
    Consumed,
    /// Reached its expiry before anyone took it
    Expired,
    /// Drained on shutdown
    Shutdown,
}

impl EvictionReason {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EvictionReason::Consumed => "consumed",
            EvictionReason::Expired => "expired",
            EvictionReason::Shutdown => "shutdown",
        }
    }
}

/// Record handed to the cleanup handler, exactly one per entry.
#[derive(Debug)]
pub struct Eviction<V> {
    pub key: Secret<String>,
    pub value: V,
    pub reason: EvictionReason,
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct State<V> {
    entries: HashMap<String, Entry<V>>,
    pending: Vec<Eviction<V>>,
}

/// Thread-safe secret store with absolute per-entry expiry.
///
/// Shared as `Arc<SecretCache<V>>` between request handlers and the sweeper;
/// callers never need their own locking.
pub struct SecretCache<V> {
    state: Mutex<State<V>>,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> SecretCache<V> {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Build a cache that reads time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State {
                entries: HashMap::new(),
                pending: Vec::new(),
            }),
            clock,
        }
    }

    /// Insert `key` with an absolute expiry of now + `ttl`.
    ///
    /// Returns `false` without touching the existing entry if `key` is already
    /// present, including an expired entry the sweep has not collected yet.
    pub fn put(&self, key: String, value: V, ttl: Duration) -> bool {
        let mut state = self.lock();
        if state.entries.contains_key(&key) {
            return false;
        }
        let expires_at = self.clock.now() + ttl;
        state.entries.insert(key, Entry { value, expires_at });
        true
    }

    /// Atomically look up and remove `key`.
    ///
    /// An entry at or past its expiry is reported absent and left for the
    /// sweep, so `take` and expiry never both claim the same entry.
    pub fn take(&self, key: &str) -> Option<V> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let now = self.clock.now();

        match state.entries.get(key) {
            Some(entry) if now < entry.expires_at => {}
            _ => return None,
        }

        let (key, entry) = state.entries.remove_entry(key)?;
        state.pending.push(Eviction {
            key: Secret::new(key),
            value: entry.value.clone(),
            reason: EvictionReason::Consumed,
        });
        Some(entry.value)
    }

    /// Collect expired entries and return every queued eviction record.
    pub fn sweep(&self) -> Vec<Eviction<V>> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let now = self.clock.now();

        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            if let Some((key, entry)) = state.entries.remove_entry(&key) {
                state.pending.push(Eviction {
                    key: Secret::new(key),
                    value: entry.value,
                    reason: EvictionReason::Expired,
                });
            }
        }

        let evictions = std::mem::take(&mut state.pending);
        if !evictions.is_empty() {
            debug!(
                evicted = evictions.len(),
                remaining = state.entries.len(),
                "swept secret cache"
            );
        }
        evictions
    }

    /// Remove everything, live or not, returning one record per entry.
    pub fn drain(&self) -> Vec<Eviction<V>> {
        let mut guard = self.lock();
        let state = &mut *guard;

        let mut evictions = std::mem::take(&mut state.pending);
        evictions.extend(state.entries.drain().map(|(key, entry)| Eviction {
            key: Secret::new(key),
            value: entry.value,
            reason: EvictionReason::Shutdown,
        }));
        evictions
    }

    /// Entries not yet evicted (expired entries count until swept).
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, State<V>> {
        // A panic while holding the guard leaves the map consistent, so keep going.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V: Clone> Default for SecretCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
