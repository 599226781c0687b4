// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Explicit reference-counted payload buffer.
//!
//! The source system relies on an I/O framework's reference-counted byte
//! buffers entangled with cache eviction (spec §9, "External-refcount
//! buffers"). [`RefBuf`] reimplements that contract explicitly: callers
//! `retain`/`release` a handle, and the backing bytes are dropped the moment
//! the count reaches zero, from whichever release call gets there first. The
//! count is not driven by `Drop` — a clone of a [`RefBuf`] does not release
//! anything on its own; only an explicit `release()` call does.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

struct Inner {
    bytes: Mutex<Option<Arc<[u8]>>>,
    count: AtomicUsize,
}

/// A reference-counted, explicitly-released payload buffer.
///
/// Deliberately does not implement `Clone`: obtaining a new handle to the
/// same buffer must go through [`RefBuf::retain`], which is the only way to
/// account for it in the outstanding reference count. A bare `Clone` would
/// hand out a handle nobody had "paid for," and an errant `release()` on it
/// could free bytes a sibling handle still needs.
pub struct RefBuf(Arc<Inner>);

impl std::fmt::Debug for RefBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefBuf")
            .field("len", &self.len())
            .field("refs", &self.0.count.load(Ordering::Acquire))
            .finish()
    }
}

impl RefBuf {
    /// Wraps `bytes` in a new buffer with a single outstanding reference.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Arc::new(Inner {
            bytes: Mutex::new(Some(bytes.into())),
            count: AtomicUsize::new(1),
        }))
    }

    /// Takes out an additional reference.
    ///
    /// # Panics
    ///
    /// Panics if called after the buffer has already been fully released.
    #[must_use]
    pub fn retain(&self) -> Self {
        let prev = self.0.count.fetch_add(1, Ordering::AcqRel);
        assert!(prev > 0, "retained a RefBuf after its last release");
        Self(Arc::clone(&self.0))
    }

    /// Releases this reference. Once the outstanding count reaches zero, the
    /// backing bytes are dropped immediately, on whichever thread's release
    /// call observes the transition.
    pub fn release(&self) {
        let prev = self.0.count.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            *self.0.bytes.lock().expect("lock is poisoned") = None;
        }
    }

    /// Returns the buffer contents, or `None` if it has been released.
    #[must_use]
    pub fn as_arc(&self) -> Option<Arc<[u8]>> {
        self.0.bytes.lock().expect("lock is poisoned").clone()
    }

    /// Returns the length of the buffer, or 0 if it has been released.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_arc().map_or(0, |b| b.len())
    }

    /// Returns `true` if the buffer is empty or has been released.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<u8>> for RefBuf {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}
