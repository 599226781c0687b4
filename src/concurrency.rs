// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Keyed critical sections.
//!
//! The write-through cache needs to serialize concurrent operations against
//! the *same* address (spec §9, "at-most-once write" / I5) without taking a
//! single global lock that would serialize unrelated addresses too. A fixed
//! array of stripes, indexed by a hash of the key, gives cheap per-key
//! mutual exclusion at the cost of (rare, harmless) false sharing between
//! keys that happen to land on the same stripe.

use std::{
    hash::{Hash, Hasher},
    sync::{Mutex, MutexGuard},
};
use xxhash_rust::xxh3::Xxh3;

/// A fixed set of lock stripes, indexed by key hash.
pub struct StripeLock {
    stripes: Vec<Mutex<()>>,
}

impl StripeLock {
    /// Creates a new stripe lock with `count` stripes. `count` is rounded up
    /// internally to a power of two for a cheap modulo via bitmask.
    #[must_use]
    pub fn new(count: usize) -> Self {
        let count = count.max(1).next_power_of_two();
        Self {
            stripes: (0..count).map(|_| Mutex::new(())).collect(),
        }
    }

    fn index_for<K: Hash>(&self, key: &K) -> usize {
        let mut hasher = Xxh3::new();
        key.hash(&mut hasher);
        let hash = hasher.finish();
        (hash as usize) & (self.stripes.len() - 1)
    }

    /// Locks the stripe that `key` hashes to, blocking the current thread.
    ///
    /// # Panics
    ///
    /// Panics if the stripe's lock is poisoned by another thread panicking
    /// while holding it.
    pub fn lock_for<K: Hash>(&self, key: &K) -> MutexGuard<'_, ()> {
        let idx = self.index_for(key);
        self.stripes[idx].lock().expect("stripe lock is poisoned")
    }
}
