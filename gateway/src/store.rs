//! Keyed in-memory record store with per-key serialized mutation.
//!
//! Every read-modify-write on a single key runs while holding that key's
//! shard lock, so two requests against the same key can never both observe
//! the pre-mutation state. Unrelated keys only contend when they share a
//! shard.

use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};
use dashmap::{mapref::entry::Entry, DashMap};

use crate::clock::SharedClock;

/// A record that can die of old age.
pub trait Expiring {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool;
}

/// What [`TtlStore::update`] does with the entry after the closure ran.
pub enum Step<R> {
    Keep(R),
    Remove(R),
}

/// Snapshot of the entry's liveness taken under the key lock.
#[derive(Debug, Clone, Copy)]
pub struct Liveness {
    pub now: DateTime<Utc>,
    pub expired: bool,
}

pub struct TtlStore<K, V> {
    entries: DashMap<K, V>,
    ttl: Duration,
    clock: SharedClock,
}

impl<K, V> TtlStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Expiring + Clone,
{
    pub fn new(ttl: Duration, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Insert or overwrite; returns the displaced record.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|v| v.clone())
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Run `f` against the live entry for `key` while holding its lock.
    /// Returns `None` when the key is absent.
    pub fn update<R>(&self, key: &K, f: impl FnOnce(&mut V, Liveness) -> Step<R>) -> Option<R> {
        let now = self.clock.now();
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let liveness = Liveness {
                    now,
                    expired: occupied.get().is_expired(now, self.ttl),
                };
                match f(occupied.get_mut(), liveness) {
                    Step::Keep(r) => Some(r),
                    Step::Remove(r) => {
                        occupied.remove();
                        Some(r)
                    }
                }
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Drop every record past its deadline. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let ttl = self.ttl;
        let mut removed = 0;
        self.entries.retain(|_, v| {
            let keep = !v.is_expired(now, ttl);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<(K, V)> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}
