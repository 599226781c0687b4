// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The write-through, weight-bounded cache fronting the segment logs (spec
//! §2 component D, §4.D).

use crate::{
    address::LogAddress,
    concurrency::StripeLock,
    data::LogData,
    error::{Error, Result},
};
use quick_cache::sync::{Cache as QuickCache, DefaultLifecycle};
use quick_cache::Weighter;

/// Number of stripe locks backing per-address write serialization. Coarser
/// than the cache's own internal sharding; only needs to prevent two writers
/// racing on the *same* address (I5).
const STRIPE_COUNT: usize = 256;

#[derive(Clone)]
struct EntryWeighter;

impl Weighter<LogAddress, LogData> for EntryWeighter {
    fn weight(&self, _key: &LogAddress, value: &LogData) -> u64 {
        value.payload.as_ref().map_or(1, |p| p.len().max(1) as u64)
    }
}

/// A loader invoked on cache miss, and a writer invoked synchronously on
/// insert. Implemented by the segment-log layer (spec §4.D).
pub trait Backing: Send + Sync {
    /// Loads the entry for `address` from durable storage, if any.
    fn load(&self, address: &LogAddress) -> Result<LogData>;

    /// Durably writes `entry` for `address`. Must not be called if the
    /// cache already holds a live entry for `address` (the caller serializes
    /// via the stripe lock before invoking this).
    fn write(&self, address: &LogAddress, entry: &LogData) -> Result<()>;
}

/// Bounded weighted cache. `get` loads through on miss; `put` writes through
/// synchronously before the value becomes visible to other readers.
pub struct WriteThroughCache {
    cache: QuickCache<LogAddress, LogData, EntryWeighter>,
    locks: StripeLock,
}

impl WriteThroughCache {
    /// Creates a cache bounded to `max_weight` (bytes, roughly; unweighted
    /// entries count as 1).
    #[must_use]
    pub fn new(max_weight: u64) -> Self {
        Self {
            cache: QuickCache::with(
                10_000,
                max_weight,
                EntryWeighter,
                ahash::RandomState::default(),
                DefaultLifecycle::default(),
            ),
            locks: StripeLock::new(STRIPE_COUNT),
        }
    }

    /// Reads the entry at `address`, loading from `backing` on miss.
    ///
    /// Returns a clone of the cached value (see [`LogData`]'s `Clone` impl:
    /// the caller's copy retains the payload buffer and must be released
    /// when the caller is done with it, unless it immediately drops the
    /// payload reference by discarding it).
    pub fn get(&self, address: &LogAddress, backing: &dyn Backing) -> Result<LogData> {
        if let Some(entry) = self.cache.get(address) {
            return Ok(entry);
        }

        let _guard = self.locks.lock_for(address);

        // Re-check: another thread may have loaded it while we waited.
        if let Some(entry) = self.cache.get(address) {
            return Ok(entry);
        }

        let loaded = backing.load(address)?;
        self.cache.insert(address.clone(), loaded.clone());
        Ok(loaded)
    }

    /// Writes `entry` for `address`: durably via `backing`, then populates
    /// the cache. On [`Error::Overwrite`] (or [`Error::ReplexOverwrite`]),
    /// the cache is left untouched — the existing entry wins (spec §4.D).
    pub fn put(&self, address: &LogAddress, entry: LogData, backing: &dyn Backing) -> Result<()> {
        let _guard = self.locks.lock_for(address);

        match backing.write(address, &entry) {
            Ok(()) => {
                self.cache.insert(address.clone(), entry);
                Ok(())
            }
            Err(err @ (Error::Overwrite | Error::ReplexOverwrite)) => Err(err),
            Err(other) => Err(other),
        }
    }

    /// Drops the cache entry for `address` without touching durable
    /// storage, releasing its payload reference.
    pub fn invalidate(&self, address: &LogAddress) {
        if let Some(entry) = self.cache.remove(address) {
            entry.1.release();
        }
    }

    /// Drops every cache entry, releasing every payload reference. Used on
    /// shutdown (spec §4.F, "Cancellation & timeouts").
    pub fn invalidate_all(&self) {
        let snapshot: Vec<_> = self.cache.iter().map(|(k, _)| k).collect();
        for key in snapshot {
            self.invalidate(&key);
        }
    }

    /// A point-in-time snapshot of resident keys, for the GC sweep.
    #[must_use]
    pub fn keys_snapshot(&self) -> Vec<LogAddress> {
        self.cache.iter().map(|(k, _)| k).collect()
    }

    /// Returns the resident entry for `address` without loading through, or
    /// `None` if it isn't currently cached.
    #[must_use]
    pub fn peek(&self, address: &LogAddress) -> Option<LogData> {
        self.cache.get(address)
    }

    /// Current total weight resident in the cache.
    #[must_use]
    pub fn weight(&self) -> u64 {
        self.cache.weight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::EntryType;
    use crate::refbuf::RefBuf;
    use std::sync::Mutex;

    struct FakeBacking {
        store: Mutex<std::collections::HashMap<LogAddress, LogData>>,
    }

    impl FakeBacking {
        fn new() -> Self {
            Self {
                store: Mutex::new(std::collections::HashMap::new()),
            }
        }
    }

    impl Backing for FakeBacking {
        fn load(&self, address: &LogAddress) -> Result<LogData> {
            Ok(self
                .store
                .lock()
                .unwrap()
                .get(address)
                .map(LogData::clone)
                .unwrap_or_else(LogData::empty))
        }

        fn write(&self, address: &LogAddress, entry: &LogData) -> Result<()> {
            let mut store = self.store.lock().unwrap();
            if store.contains_key(address) {
                return Err(Error::Overwrite);
            }
            store.insert(address.clone(), entry.clone());
            Ok(())
        }
    }

    #[test]
    fn miss_loads_through_backing() {
        let cache = WriteThroughCache::new(1_000);
        let backing = FakeBacking::new();
        let addr = LogAddress::global(1);

        let got = cache.get(&addr, &backing).unwrap();
        assert_eq!(EntryType::Empty, got.entry_type);
    }

    #[test]
    fn put_then_get_hits_cache() {
        let cache = WriteThroughCache::new(1_000);
        let backing = FakeBacking::new();
        let addr = LogAddress::global(1);

        cache
            .put(&addr, LogData::data(RefBuf::new(b"hi".to_vec())), &backing)
            .unwrap();

        let got = cache.get(&addr, &backing).unwrap();
        assert_eq!(EntryType::Data, got.entry_type);
        assert_eq!(got.payload.unwrap().len(), 2);
    }

    #[test]
    fn overwrite_does_not_replace_cached_value() {
        let cache = WriteThroughCache::new(1_000);
        let backing = FakeBacking::new();
        let addr = LogAddress::global(1);

        cache
            .put(&addr, LogData::data(RefBuf::new(b"first".to_vec())), &backing)
            .unwrap();

        let err = cache
            .put(&addr, LogData::data(RefBuf::new(b"second".to_vec())), &backing)
            .unwrap_err();
        assert!(matches!(err, Error::Overwrite));

        let got = cache.get(&addr, &backing).unwrap();
        assert_eq!(got.payload.unwrap().as_arc().unwrap().as_ref(), b"first");
    }

    #[test]
    fn invalidate_releases_payload() {
        let cache = WriteThroughCache::new(1_000);
        let backing = FakeBacking::new();
        let addr = LogAddress::global(1);
        let buf = RefBuf::new(vec![1, 2, 3]);

        cache.put(&addr, LogData::data(buf.retain()), &backing).unwrap();
        cache.invalidate(&addr);

        assert_eq!(0, buf.len(), "cache's reference was released on invalidate");
    }
}
