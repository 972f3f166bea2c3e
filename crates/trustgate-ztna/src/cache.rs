//! One-time code cache
//!
//! Key-value store abstraction for pending SMS codes: get / set-with-TTL /
//! delete, plus an atomic compare-and-consume. The in-memory implementation
//! backs tests and single-instance deployments; multi-instance deployments
//! swap in a shared store behind the same trait.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use trustgate_common::Clock;

/// Result of a compare-and-consume attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Match; the entry has been removed. At most one caller sees this.
    Consumed,
    /// Entry present and live, but the submitted value did not match.
    /// The entry stays in place.
    Mismatch,
    /// No entry under this key.
    Missing,
    /// Entry existed but was past its TTL; it has been purged.
    Expired,
}

/// TTL-bounded one-time code store.
pub trait CodeCache: Send + Sync {
    /// Store `value` under `key`, replacing any prior entry.
    fn put(&self, key: &str, value: &str, ttl: Duration);

    /// Live value for `key`, if any.
    fn get(&self, key: &str) -> Option<String>;

    fn delete(&self, key: &str);

    /// Constant-time compare of `submitted` against the stored value,
    /// removing the entry on match. Concurrent attempts with the same code
    /// yield exactly one [`ConsumeOutcome::Consumed`].
    fn consume(&self, key: &str, submitted: &str) -> ConsumeOutcome;
}

struct CacheEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// In-process implementation over a concurrent map with clock-checked
/// expiry, so TTL behavior is deterministic under a fixed test clock.
pub struct MemoryCodeCache {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
}

impl MemoryCodeCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }
}

impl CodeCache for MemoryCodeCache {
    fn put(&self, key: &str, value: &str, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: self.clock.now() + ttl,
            },
        );
    }

    fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        // copy out under the read guard; purging below needs the write lock
        let live = self
            .entries
            .get(key)
            .map(|entry| (entry.expires_at > now).then(|| entry.value.clone()));
        match live {
            Some(Some(value)) => Some(value),
            Some(None) => {
                self.entries.remove_if(key, |_, e| e.expires_at <= now);
                None
            }
            None => None,
        }
    }

    fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    fn consume(&self, key: &str, submitted: &str) -> ConsumeOutcome {
        let now = self.clock.now();
        let mut outcome = ConsumeOutcome::Missing;

        // remove_if runs under the entry lock, so only one concurrent
        // matching caller observes Consumed.
        self.entries.remove_if(key, |_, entry| {
            if entry.expires_at <= now {
                outcome = ConsumeOutcome::Expired;
                return true; // purge
            }
            let matches = entry.value.len() == submitted.len()
                && bool::from(entry.value.as_bytes().ct_eq(submitted.as_bytes()));
            outcome = if matches {
                ConsumeOutcome::Consumed
            } else {
                ConsumeOutcome::Mismatch
            };
            matches
        });

        outcome
    }
}
