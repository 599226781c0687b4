// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A single segment file: the append-only, positionally-addressed record
//! store for one window of `SEGMENT_SIZE` addresses.

mod record;

use crate::error::{Error, Result};
use record::{checksum, Header, FLAG_WRITTEN, HEADER_LEN};
use std::{
    collections::HashSet,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

/// Default extent window: `INT_MAX >> 4` bytes (spec §6, "File size limit").
pub const DEFAULT_FILE_SIZE_LIMIT: u64 = (i32::MAX as u64) >> 4;

/// Reduced extent window for `quickcheck_test_mode`, where sparse files are
/// expensive to allocate repeatedly.
pub const TEST_MODE_FILE_SIZE_LIMIT: u64 = 4 * 1024 * 1024;

/// The raw body of a record: metadata bytes followed by payload bytes.
pub struct RawEntry {
    pub meta: Vec<u8>,
    pub payload: Vec<u8>,
}

enum Backend {
    Disk(File),
    Memory(Vec<u8>),
}

impl Backend {
    fn len(&mut self) -> std::io::Result<u64> {
        match self {
            Self::Disk(f) => f.seek(SeekFrom::End(0)),
            Self::Memory(v) => Ok(v.len() as u64),
        }
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Self::Disk(f) => {
                f.seek(SeekFrom::Start(offset))?;
                f.read_exact(buf)
            }
            Self::Memory(v) => {
                let start = offset as usize;
                let end = start + buf.len();
                if end > v.len() {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "read past end of in-memory segment",
                    ));
                }
                buf.copy_from_slice(&v[start..end]);
                Ok(())
            }
        }
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Disk(f) => {
                f.seek(SeekFrom::Start(offset))?;
                f.write_all(bytes)
            }
            Self::Memory(v) => {
                let start = offset as usize;
                let end = start + bytes.len();
                if end > v.len() {
                    v.resize(end, 0);
                }
                v[start..end].copy_from_slice(bytes);
                Ok(())
            }
        }
    }

    fn sync(&mut self) -> std::io::Result<()> {
        match self {
            Self::Disk(f) => f.sync_all(),
            Self::Memory(_) => Ok(()),
        }
    }

    /// Reads everything from `offset` to the current end of file, for the
    /// sequential recovery scan.
    fn read_tail(&mut self, offset: u64) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Disk(f) => {
                f.seek(SeekFrom::Start(offset))?;
                let mut buf = vec![];
                f.read_to_end(&mut buf)?;
                Ok(buf)
            }
            Self::Memory(v) => Ok(v.get(offset as usize..).unwrap_or_default().to_vec()),
        }
    }
}

struct State {
    backend: Backend,
    /// Addresses known present, per the recovery scan plus subsequent appends.
    index: HashSet<u64>,
    /// Offset at which the next header may be written.
    tail: u64,
}

/// A single segment file covering one `[start, start + SEGMENT_SIZE)` window
/// of addresses.
pub struct Segment {
    pub(crate) path: Option<PathBuf>,
    pub(crate) start: u64,
    no_verify: bool,
    file_size_limit: u64,
    state: Mutex<State>,
}

impl Segment {
    /// Opens (creating if absent) the on-disk segment at `path`, scanning it
    /// for its recoverable record index.
    pub fn open(path: &Path, start: u64, no_verify: bool, file_size_limit: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        let mut backend = Backend::Disk(file);
        let (index, tail) = Self::recover(&mut backend, no_verify)?;

        Ok(Self {
            path: Some(path.to_path_buf()),
            start,
            no_verify,
            file_size_limit,
            state: Mutex::new(State {
                backend,
                index,
                tail,
            }),
        })
    }

    /// Creates a purely in-memory segment (`Config::memory`), never touching
    /// the filesystem.
    #[must_use]
    pub fn open_in_memory(start: u64, no_verify: bool, file_size_limit: u64) -> Self {
        Self {
            path: None,
            start,
            no_verify,
            file_size_limit,
            state: Mutex::new(State {
                backend: Backend::Memory(vec![]),
                index: HashSet::new(),
                tail: 0,
            }),
        }
    }

    /// Scans from the start of the file, building the address index and
    /// stopping at the first torn or absent record.
    fn recover(backend: &mut Backend, no_verify: bool) -> Result<(HashSet<u64>, u64)> {
        let mut index = HashSet::new();
        let file_len = backend.len()?;
        let tail_bytes = backend.read_tail(0)?;
        let mut cursor = &tail_bytes[..];
        let mut consumed: u64 = 0;

        loop {
            let header = match Header::read(&mut cursor)? {
                Some(h) => h,
                None => break,
            };
            consumed += HEADER_LEN;

            let body_len = u64::from(header.size);
            if consumed + body_len > file_len {
                return Err(Error::Corruption);
            }

            if !header.is_written() {
                // Torn write or a pre-allocated-but-unfilled tail. Rewind.
                break;
            }

            if header.meta_size > header.size {
                return Err(Error::Corruption);
            }

            let mut body = vec![0u8; header.size as usize];
            std::io::Read::read_exact(&mut cursor, &mut body)
                .map_err(|_| Error::Corruption)?;
            consumed += body_len;

            if !no_verify {
                let meta = &body[..header.meta_size as usize];
                let payload = &body[header.meta_size as usize..];
                if checksum(meta, payload) != header.checksum {
                    return Err(Error::Corruption);
                }
            }

            index.insert(header.addr);
        }

        Ok((index, consumed))
    }

    /// Returns `true` if `addr` already has a durable record.
    pub fn contains(&self, addr: u64) -> Result<bool> {
        let state = self.lock()?;
        Ok(state.index.contains(&addr))
    }

    /// Appends a new record for `addr`. Returns [`Error::Overwrite`] if the
    /// address is already present.
    pub fn append(&self, addr: u64, entry: &RawEntry) -> Result<()> {
        let mut state = self.lock()?;

        if state.index.contains(&addr) {
            return Err(Error::Overwrite);
        }

        #[allow(clippy::cast_possible_truncation)]
        let size = (entry.meta.len() + entry.payload.len()) as u32;
        #[allow(clippy::cast_possible_truncation)]
        let meta_size = entry.meta.len() as u32;
        let crc = checksum(&entry.meta, &entry.payload);

        let record_offset = state.tail;
        let end_offset = record_offset + HEADER_LEN + u64::from(size);
        if end_offset > self.file_size_limit {
            return Err(Error::SegmentFull);
        }

        let header = Header {
            flags: 0,
            addr,
            size,
            meta_size,
            checksum: crc,
        };

        let mut header_bytes = vec![];
        header.write(&mut header_bytes)?;

        state.backend.write_at(record_offset, &header_bytes)?;
        let body_offset = record_offset + HEADER_LEN;
        state.backend.write_at(body_offset, &entry.meta)?;
        state
            .backend
            .write_at(body_offset + entry.meta.len() as u64, &entry.payload)?;
        state.backend.sync()?;

        let written_header = Header {
            flags: FLAG_WRITTEN,
            ..header
        };
        let mut flags_bytes = vec![];
        written_header.write(&mut flags_bytes)?;
        state.backend.write_at(record_offset, &flags_bytes)?;
        state.backend.sync()?;

        state.tail = body_offset + u64::from(size);
        state.index.insert(addr);

        Ok(())
    }

    /// Reads the record for `addr`, if present.
    pub fn read(&self, addr: u64) -> Result<Option<RawEntry>> {
        let mut state = self.lock()?;

        if !state.index.contains(&addr) {
            return Ok(None);
        }

        // A linear rescan keyed by address index membership is avoided by
        // keeping only presence in `index`; the offset is rediscovered by a
        // forward scan from the start. Segments are bounded in size
        // (SEGMENT_SIZE addresses, <= file size limit), so this is cheap
        // relative to the fsync cost already paid on every write.
        let tail_bytes = state.backend.read_tail(0)?;
        let mut cursor = &tail_bytes[..];

        loop {
            let header = match Header::read(&mut cursor).map_err(|_| Error::Corruption)? {
                Some(h) if h.is_written() => h,
                _ => break,
            };

            let mut body = vec![0u8; header.size as usize];
            std::io::Read::read_exact(&mut cursor, &mut body).map_err(|_| Error::Corruption)?;

            if header.addr == addr {
                let meta = body[..header.meta_size as usize].to_vec();
                let payload = body[header.meta_size as usize..].to_vec();

                if !self.no_verify && checksum(&meta, &payload) != header.checksum {
                    return Err(Error::Corruption);
                }

                return Ok(Some(RawEntry { meta, payload }));
            }
        }

        Ok(None)
    }

    /// Number of addresses currently indexed in this segment.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.index.len())
    }

    /// Returns `true` if no addresses are indexed.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Current tail offset, for diagnostics/tests.
    pub fn tail(&self) -> Result<u64> {
        Ok(self.lock()?.tail)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::Io(std::io::Error::other("segment lock poisoned")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(meta: &[u8], payload: &[u8]) -> RawEntry {
        RawEntry {
            meta: meta.to_vec(),
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn append_then_read_round_trips() {
        let segment = Segment::open_in_memory(0, false, DEFAULT_FILE_SIZE_LIMIT);
        segment.append(5, &entry(b"m", b"hello")).unwrap();

        let got = segment.read(5).unwrap().unwrap();
        assert_eq!(got.meta, b"m");
        assert_eq!(got.payload, b"hello");
    }

    #[test]
    fn read_of_absent_address_is_none() {
        let segment = Segment::open_in_memory(0, false, DEFAULT_FILE_SIZE_LIMIT);
        assert!(segment.read(42).unwrap().is_none());
    }

    #[test]
    fn duplicate_append_is_overwrite_error() {
        let segment = Segment::open_in_memory(0, false, DEFAULT_FILE_SIZE_LIMIT);
        segment.append(1, &entry(b"", b"a")).unwrap();

        let err = segment.append(1, &entry(b"", b"b")).unwrap_err();
        assert!(matches!(err, Error::Overwrite));

        // original value still wins
        let got = segment.read(1).unwrap().unwrap();
        assert_eq!(got.payload, b"a");
    }

    #[test]
    fn recovers_index_from_disk_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0000000000000000000");

        {
            let segment = Segment::open(&path, 0, false, DEFAULT_FILE_SIZE_LIMIT).unwrap();
            segment.append(3, &entry(b"", b"x")).unwrap();
            segment.append(4, &entry(b"", b"y")).unwrap();
        }

        let reopened = Segment::open(&path, 0, false, DEFAULT_FILE_SIZE_LIMIT).unwrap();
        assert!(reopened.contains(3).unwrap());
        assert!(reopened.contains(4).unwrap());
        assert_eq!(reopened.read(4).unwrap().unwrap().payload, b"y");
    }

    #[test]
    fn torn_write_is_not_recovered_and_tail_rewinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment");

        {
            let segment = Segment::open(&path, 0, false, DEFAULT_FILE_SIZE_LIMIT).unwrap();
            segment.append(1, &entry(b"", b"committed")).unwrap();
        }

        // Simulate a crash between HEADER write and WRITTEN-flag set: append
        // a header with WRITTEN clear and a body, but never flip the flag.
        {
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            let tail = file.seek(SeekFrom::End(0)).unwrap();

            let header = Header {
                flags: 0,
                addr: 2,
                size: 5,
                meta_size: 0,
                checksum: checksum(b"", b"later"),
            };
            let mut bytes = vec![];
            header.write(&mut bytes).unwrap();
            bytes.extend_from_slice(b"later");
            file.seek(SeekFrom::Start(tail)).unwrap();
            file.write_all(&bytes).unwrap();
            file.sync_all().unwrap();
        }

        let reopened = Segment::open(&path, 0, false, DEFAULT_FILE_SIZE_LIMIT).unwrap();
        assert!(reopened.contains(1).unwrap());
        assert!(!reopened.contains(2).unwrap());

        // the address remains writable after recovery
        reopened.append(2, &entry(b"", b"retry")).unwrap();
        assert_eq!(reopened.read(2).unwrap().unwrap().payload, b"retry");
    }

    #[test]
    fn checksum_mismatch_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment");

        {
            let segment = Segment::open(&path, 0, false, DEFAULT_FILE_SIZE_LIMIT).unwrap();
            segment.append(1, &entry(b"", b"original")).unwrap();
        }

        // Corrupt the payload bytes in place without touching the header.
        {
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(HEADER_LEN)).unwrap();
            file.write_all(b"corrupted").unwrap();
            file.sync_all().unwrap();
        }

        let reopened = Segment::open(&path, 0, false, DEFAULT_FILE_SIZE_LIMIT);
        assert!(matches!(reopened, Err(Error::Corruption)));
    }

    #[test]
    fn no_verify_skips_checksum_on_read() {
        let segment = Segment::open_in_memory(0, true, DEFAULT_FILE_SIZE_LIMIT);
        segment.append(1, &entry(b"", b"hello")).unwrap();
        assert!(segment.read(1).unwrap().is_some());
    }

    #[test]
    fn append_past_file_size_limit_is_segment_full() {
        let segment = Segment::open_in_memory(0, false, HEADER_LEN + 4);
        segment.append(1, &entry(b"", b"ok")).unwrap();

        let err = segment.append(2, &entry(b"", b"too-big")).unwrap_err();
        assert!(matches!(err, Error::SegmentFull));
    }
}
