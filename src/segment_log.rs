// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! One address space's collection of segment files: the global log, or a
//! single stream's log (spec §2, component A).

use crate::{
    address::segment_start,
    error::Result,
    segment::{RawEntry, Segment},
    HashMap,
};
use std::{
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

/// Where a [`SegmentLog`] keeps its files, or that it keeps none at all.
enum Root {
    Disk(PathBuf),
    Memory,
}

/// A positionally-addressed append-only log, split into fixed-size segment
/// windows that are opened lazily and kept open for the life of the process.
pub struct SegmentLog {
    root: Root,
    segment_size: u64,
    no_verify: bool,
    file_size_limit: u64,
    segments: RwLock<HashMap<u64, Arc<Segment>>>,
}

impl SegmentLog {
    /// Opens a disk-backed segment log rooted at `dir` (created if absent).
    #[must_use]
    pub fn open(
        dir: impl Into<PathBuf>,
        segment_size: u64,
        no_verify: bool,
        file_size_limit: u64,
    ) -> Self {
        Self {
            root: Root::Disk(dir.into()),
            segment_size,
            no_verify,
            file_size_limit,
            segments: RwLock::new(HashMap::new()),
        }
    }

    /// Creates an in-memory-only segment log (`Config::memory`).
    #[must_use]
    pub fn open_in_memory(segment_size: u64, no_verify: bool, file_size_limit: u64) -> Self {
        Self {
            root: Root::Memory,
            segment_size,
            no_verify,
            file_size_limit,
            segments: RwLock::new(HashMap::new()),
        }
    }

    fn segment_path(&self, start: u64) -> Option<PathBuf> {
        match &self.root {
            Root::Disk(dir) => Some(dir.join(format!("{start:020}"))),
            Root::Memory => None,
        }
    }

    fn get_or_open(&self, start: u64) -> Result<Arc<Segment>> {
        if let Some(segment) = self.segments.read().expect("lock poisoned").get(&start) {
            return Ok(Arc::clone(segment));
        }

        // insert-if-absent under the write lock; a concurrent opener for the
        // same window re-checks after acquiring it rather than opening twice.
        let mut segments = self.segments.write().expect("lock poisoned");
        if let Some(segment) = segments.get(&start) {
            return Ok(Arc::clone(segment));
        }

        let segment = Arc::new(match self.segment_path(start) {
            Some(path) => Segment::open(&path, start, self.no_verify, self.file_size_limit)?,
            None => Segment::open_in_memory(start, self.no_verify, self.file_size_limit),
        });

        segments.insert(start, Arc::clone(&segment));
        Ok(segment)
    }

    /// Appends a record at `address`. See [`Segment::append`].
    pub fn append(&self, address: u64, entry: &RawEntry) -> Result<()> {
        let start = segment_start(address, self.segment_size);
        self.get_or_open(start)?.append(address, entry)
    }

    /// Reads the record at `address`, if the containing segment has even
    /// been opened yet (an unopened segment is treated as empty, since it
    /// cannot contain any record no writer has addressed).
    pub fn read(&self, address: u64) -> Result<Option<RawEntry>> {
        let start = segment_start(address, self.segment_size);
        self.get_or_open(start)?.read(address)
    }

    /// Returns `true` if `address` has a durable record.
    pub fn contains(&self, address: u64) -> Result<bool> {
        let start = segment_start(address, self.segment_size);
        self.get_or_open(start)?.contains(address)
    }

    /// Number of segment windows currently open in memory.
    pub fn open_segment_count(&self) -> usize {
        self.segments.read().expect("lock poisoned").len()
    }
}

/// Computes the on-disk directory for a stream's segment log, rooted at
/// `base`. `None` denotes the global log, which lives directly under `base`
/// (spec §6: `log/` for global, `log/<stream-id>/` per stream, where `base`
/// itself plays the role of `log/`).
#[must_use]
pub fn log_dir(base: &Path, stream: Option<&crate::address::StreamId>) -> PathBuf {
    match stream {
        Some(id) => base.join(id.as_dirname()),
        None => base.to_path_buf(),
    }
}
