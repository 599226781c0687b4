// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-node durable storage service for a distributed shared log.
//!
//! A **log unit** accepts positional writes at 64-bit addresses (global or
//! per-stream), persists them through a write-through, size-bounded cache
//! onto append-only segment files, serves positional reads, and
//! garbage-collects cache entries whose streams have all been trimmed past
//! their address.
//!
//! Layout election, epoch validation, RPC transport and message framing are
//! the concern of a surrounding router; this crate only implements the
//! storage contract it exposes to that router.
//!
//! # Example
//!
//! ```
//! use log_unit::{Config, LogAddress, LogUnit};
//!
//! # fn main() -> log_unit::Result<()> {
//! let unit = LogUnit::open(Config::new().memory(true))?;
//!
//! unit.write(LogAddress::global(5), b"hello".to_vec())?;
//! let entry = unit.read(LogAddress::global(5))?;
//! assert_eq!(entry.payload.as_ref().and_then(|p| p.as_arc()).as_deref(), Some(b"hello".as_slice()));
//! entry.release();
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::missing_const_for_fn, clippy::module_name_repetitions)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod address;
mod cache;
mod coding;
mod concurrency;
mod config;
mod data;
mod error;
mod gc;
mod handlers;
mod log_unit;
mod refbuf;
mod segment;
mod segment_log;
mod trim;
mod version;

pub(crate) type HashMap<K, V> = std::collections::HashMap<K, V, xxhash_rust::xxh3::Xxh3Builder>;

pub use {
    address::{LogAddress, StreamId},
    config::Config,
    data::{EntryType, LogData, MetaKey, MetaValue},
    error::{Error, Result},
    handlers::{dispatch, Request, Response},
    log_unit::LogUnit,
    refbuf::RefBuf,
};
