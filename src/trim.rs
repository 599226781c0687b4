// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-stream trim high-water marks (spec §2, component C).

use crate::{address::StreamId, HashMap};
use std::sync::RwLock;

/// Concurrent `stream_id -> u64` map of the highest address each stream has
/// trimmed through. No persistence is required; a restart starts empty and
/// clients are expected to re-trim.
#[derive(Default)]
pub struct TrimMap {
    marks: RwLock<HashMap<StreamId, u64>>,
}

impl TrimMap {
    /// Creates an empty trim map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances `stream`'s trim mark to `address`, monotonically: a lower or
    /// equal value is a no-op.
    pub fn put_max(&self, stream: StreamId, address: u64) {
        let mut marks = self.marks.write().expect("lock poisoned");
        marks
            .entry(stream)
            .and_modify(|existing| *existing = (*existing).max(address))
            .or_insert(address);
    }

    /// Returns `stream`'s current trim mark, or `None` if it has never been
    /// trimmed.
    #[must_use]
    pub fn get(&self, stream: &StreamId) -> Option<u64> {
        self.marks.read().expect("lock poisoned").get(stream).copied()
    }

    /// Returns `true` if `address` is at or below `stream`'s trim mark
    /// (i.e. an entry placed there is safe to discard).
    #[must_use]
    pub fn is_trimmed(&self, stream: &StreamId, address: u64) -> bool {
        self.get(stream).is_some_and(|mark| mark >= address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_stream_is_not_trimmed() {
        let map = TrimMap::new();
        let stream = StreamId::new_random();
        assert!(!map.is_trimmed(&stream, 0));
    }

    #[test]
    fn put_max_is_monotonic() {
        let map = TrimMap::new();
        let stream = StreamId::new_random();

        map.put_max(stream, 10);
        map.put_max(stream, 5);
        assert_eq!(Some(10), map.get(&stream));

        map.put_max(stream, 20);
        assert_eq!(Some(20), map.get(&stream));
    }

    #[test]
    fn is_trimmed_reflects_high_water_mark() {
        let map = TrimMap::new();
        let stream = StreamId::new_random();
        map.put_max(stream, 10);

        assert!(map.is_trimmed(&stream, 5));
        assert!(map.is_trimmed(&stream, 10));
        assert!(!map.is_trimmed(&stream, 11));
    }
}
