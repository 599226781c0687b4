// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The top-level service tying cache, segment logs, trim map and GC engine
//! together (spec §2).

use crate::{
    address::{segment_start, LogAddress, StreamId, SEGMENT_SIZE},
    cache::{Backing, WriteThroughCache},
    config::Config,
    data::{EntryType, LogData, MetaKey, MetaValue},
    error::{Error, Result},
    gc::GcEngine,
    segment_log::{log_dir, SegmentLog},
    version::Version,
    HashMap,
};
use log::{debug, info};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    sync::{Arc, Mutex, RwLock},
};

fn read_u32_le<R: std::io::Read>(reader: &mut R) -> Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes).map_err(|_| Error::Corruption)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64_le<R: std::io::Read>(reader: &mut R) -> Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes).map_err(|_| Error::Corruption)?;
    Ok(u64::from_le_bytes(bytes))
}

const MARKER_FILE: &str = ".logunit";

/// Bridges the cache's `Backing` trait to a per-address-space `SegmentLog`,
/// encoding/decoding `LogData` at the boundary.
struct SegmentBacking {
    log: SegmentLog,
}

impl Backing for SegmentBacking {
    fn load(&self, address: &LogAddress) -> Result<LogData> {
        match self.log.read(address.address)? {
            Some(raw) => decode_entry(&raw.meta, raw.payload),
            None => Ok(LogData::empty()),
        }
    }

    fn write(&self, address: &LogAddress, entry: &LogData) -> Result<()> {
        let raw = encode_entry(entry)?;
        self.log.append(address.address, &raw)
    }
}

fn encode_entry(entry: &LogData) -> Result<crate::segment::RawEntry> {
    use crate::coding::Encode;

    let mut meta = vec![];
    entry.entry_type.encode_into(&mut meta)?;

    #[allow(clippy::cast_possible_truncation)]
    meta.extend_from_slice(&(entry.streams.len() as u32).to_le_bytes());
    for stream in &entry.streams {
        stream.encode_into(&mut meta)?;
    }

    #[allow(clippy::cast_possible_truncation)]
    meta.extend_from_slice(&(entry.backpointers.len() as u32).to_le_bytes());
    for (stream, backpointer) in &entry.backpointers {
        stream.encode_into(&mut meta)?;
        meta.extend_from_slice(&backpointer.to_le_bytes());
    }

    #[allow(clippy::cast_possible_truncation)]
    meta.extend_from_slice(&(entry.metadata.len() as u32).to_le_bytes());
    for (key, value) in &entry.metadata {
        key.encode_into(&mut meta)?;
        value.encode_into(&mut meta)?;
    }

    let payload = entry
        .payload
        .as_ref()
        .and_then(|p| p.as_arc())
        .map_or_else(Vec::new, |bytes| bytes.to_vec());

    Ok(crate::segment::RawEntry { meta, payload })
}

fn decode_entry(meta: &[u8], payload: Vec<u8>) -> Result<LogData> {
    use crate::coding::Decode;
    use crate::refbuf::RefBuf;

    let mut cursor = meta;
    let entry_type = EntryType::decode_from(&mut cursor)?;

    let stream_count = read_u32_le(&mut cursor)?;
    let mut streams = BTreeSet::new();
    for _ in 0..stream_count {
        streams.insert(StreamId::decode_from(&mut cursor)?);
    }

    let backpointer_count = read_u32_le(&mut cursor)?;
    let mut backpointers = BTreeMap::new();
    for _ in 0..backpointer_count {
        let stream = StreamId::decode_from(&mut cursor)?;
        let address = read_u64_le(&mut cursor)?;
        backpointers.insert(stream, address);
    }

    let count = read_u32_le(&mut cursor)?;
    let mut metadata = BTreeMap::new();
    for _ in 0..count {
        let key = MetaKey::decode_from(&mut cursor)?;
        let value = MetaValue::decode_from(&mut cursor)?;
        metadata.insert(key, value);
    }

    let data_payload = if matches!(entry_type, EntryType::Hole | EntryType::Empty | EntryType::Trimmed) {
        None
    } else {
        Some(RefBuf::new(payload))
    };

    Ok(LogData {
        entry_type,
        payload: data_payload,
        streams,
        backpointers,
        metadata,
    })
}

/// Per-node durable storage service for one replica of a distributed shared
/// log.
pub struct LogUnit {
    config: Config,
    cache: Arc<WriteThroughCache>,
    trim_map: Arc<crate::trim::TrimMap>,
    global: SegmentBacking,
    streams: RwLock<HashMap<StreamId, Arc<SegmentBacking>>>,
    /// Each stream's most recently written address, for `LogData::backpointers`
    /// (spec.md "per-stream previous address"). Not persisted across restart;
    /// a stream's first post-restart write falls back to its own address, the
    /// same convention used for a stream's very first write.
    stream_heads: RwLock<HashMap<StreamId, u64>>,
    gc: Mutex<GcEngine>,
}

impl LogUnit {
    /// Opens (or creates) a log unit under `config`.
    pub fn open(config: Config) -> Result<Self> {
        if let Some(dir) = config.log_dir() {
            if !config.is_memory() {
                std::fs::create_dir_all(dir)?;
                Self::write_or_check_marker(dir)?;
            }
        }

        let segment_size = SEGMENT_SIZE;
        let no_verify = config.is_no_verify();

        let file_size_limit = config.file_size_limit();
        let global_log = if config.is_memory() {
            SegmentLog::open_in_memory(segment_size, no_verify, file_size_limit)
        } else {
            let base = config.log_dir().expect("log_path required unless memory");
            SegmentLog::open(log_dir(base, None), segment_size, no_verify, file_size_limit)
        };

        let cache = Arc::new(WriteThroughCache::new(config.max_cache_bytes_value()));
        let trim_map = Arc::new(crate::trim::TrimMap::new());
        let gc = GcEngine::spawn(
            Arc::clone(&cache),
            Arc::clone(&trim_map),
            config.gc_interval_value(),
        );

        info!("log unit opened (memory={})", config.is_memory());

        Ok(Self {
            config,
            cache,
            trim_map,
            global: SegmentBacking { log: global_log },
            streams: RwLock::new(HashMap::new()),
            stream_heads: RwLock::new(HashMap::new()),
            gc: Mutex::new(gc),
        })
    }

    fn write_or_check_marker(dir: &Path) -> Result<()> {
        let path = dir.join(MARKER_FILE);
        if path.exists() {
            let bytes = std::fs::read(&path)?;
            let version = Version::parse_file_header(&bytes);
            if version.is_none() {
                return Err(Error::InvalidVersion(None));
            }
        } else {
            let mut file = std::fs::File::create(&path)?;
            Version::V1.write_file_header(&mut file)?;
        }
        Ok(())
    }

    fn backing_for(&self, stream: StreamId) -> Result<Arc<SegmentBacking>> {
        if let Some(backing) = self.streams.read().expect("lock poisoned").get(&stream) {
            return Ok(Arc::clone(backing));
        }

        let mut streams = self.streams.write().expect("lock poisoned");
        if let Some(backing) = streams.get(&stream) {
            return Ok(Arc::clone(backing));
        }

        let log = if self.config.is_memory() {
            SegmentLog::open_in_memory(
                SEGMENT_SIZE,
                self.config.is_no_verify(),
                self.config.file_size_limit(),
            )
        } else {
            let base = self
                .config
                .log_dir()
                .expect("log_path required unless memory");
            SegmentLog::open(
                log_dir(base, Some(&stream)),
                SEGMENT_SIZE,
                self.config.is_no_verify(),
                self.config.file_size_limit(),
            )
        };

        let backing = Arc::new(SegmentBacking { log });
        streams.insert(stream, Arc::clone(&backing));
        Ok(backing)
    }

    /// Returns `stream`'s previously recorded head address and advances it to
    /// `address`. A stream's first write has no previous address, so it backpoints
    /// to itself.
    fn take_and_advance_head(&self, stream: StreamId, address: u64) -> u64 {
        let mut heads = self.stream_heads.write().expect("lock poisoned");
        let previous = heads.get(&stream).copied().unwrap_or(address);
        heads.insert(stream, address);
        previous
    }

    /// Reads the entry at `address`, loading through on cache miss.
    pub fn read(&self, address: LogAddress) -> Result<LogData> {
        match address.stream {
            None => self.cache.get(&address, &self.global),
            Some(stream) => {
                let backing = self.backing_for(stream)?;
                self.cache.get(&address, backing.as_ref())
            }
        }
    }

    /// Writes `payload` at `address`. Fails with [`Error::Overwrite`] if
    /// already written.
    pub fn write(&self, address: LogAddress, payload: Vec<u8>) -> Result<()> {
        let mut entry = LogData::data(crate::refbuf::RefBuf::new(payload));
        match address.stream {
            None => self.cache.put(&address, entry, &self.global),
            Some(stream) => {
                let backpointer = self.take_and_advance_head(stream, address.address);
                entry = entry.with_stream(stream, backpointer);
                let backing = self.backing_for(stream)?;
                self.cache.put(&address, entry, backing.as_ref())
            }
        }
    }

    /// Multi-stream ("REPLEX") write: the same payload at one address per
    /// stream. Stops at the first failure; earlier per-stream writes in this
    /// call remain durable (spec §7, §9 Q1 — no rollback).
    pub fn write_replex(&self, placements: &[(StreamId, u64)], payload: &[u8]) -> Result<()> {
        for (stream, addr) in placements {
            let address = LogAddress::stream(*addr, *stream);
            let backpointer = self.take_and_advance_head(*stream, *addr);
            let entry =
                LogData::data(crate::refbuf::RefBuf::new(payload.to_vec())).with_stream(*stream, backpointer);
            let backing = self.backing_for(*stream)?;

            match self.cache.put(&address, entry, backing.as_ref()) {
                Ok(()) => {}
                Err(Error::Overwrite) => return Err(Error::ReplexOverwrite),
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    /// Marks `address` committed. Fails with [`Error::NoEntry`] if absent.
    pub fn commit(&self, address: LogAddress) -> Result<()> {
        let current = self.read(address)?;
        if current.is_empty() {
            return Err(Error::NoEntry);
        }

        let mut entry = current.clone();
        entry.metadata.insert(MetaKey::Commit, MetaValue::U64(1));
        current.release();

        match address.stream {
            None => self.cache.put(&address, entry, &self.global),
            Some(stream) => {
                let backing = self.backing_for(stream)?;
                self.cache.put(&address, entry, backing.as_ref())
            }
        }
    }

    /// Fills `address` with a hole marker. Fails with [`Error::Overwrite`]
    /// if already written (P4).
    pub fn fill_hole(&self, address: LogAddress) -> Result<()> {
        let mut entry = LogData::hole();
        match address.stream {
            None => self.cache.put(&address, entry, &self.global),
            Some(stream) => {
                let backpointer = self.take_and_advance_head(stream, address.address);
                entry = entry.with_stream(stream, backpointer);
                let backing = self.backing_for(stream)?;
                self.cache.put(&address, entry, backing.as_ref())
            }
        }
    }

    /// Advances `stream`'s trim high-water mark.
    pub fn trim(&self, stream: StreamId, prefix: u64) {
        self.trim_map.put_max(stream, prefix);
    }

    /// Requests an immediate GC sweep.
    pub fn force_gc(&self) {
        self.gc.lock().expect("lock poisoned").force_gc();
    }

    /// Updates the GC sweep cadence.
    pub fn set_gc_interval(&self, interval: std::time::Duration) {
        self.gc.lock().expect("lock poisoned").set_interval(interval);
    }

    /// Cancels the GC loop and releases every cached payload reference.
    pub fn shutdown(&self) {
        debug!("log unit shutting down");
        self.gc.lock().expect("lock poisoned").shutdown();
        self.cache.invalidate_all();
    }

    /// Returns the segment window start for `address` (test/diagnostic use).
    #[must_use]
    pub fn segment_window(address: u64) -> u64 {
        segment_start(address, SEGMENT_SIZE)
    }
}

impl Drop for LogUnit {
    fn drop(&mut self) {
        self.shutdown();
    }
}
