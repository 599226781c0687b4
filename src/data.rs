// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The stored entry type and its metadata.

use crate::{
    address::StreamId,
    coding::{Decode, DecodeError, Encode, EncodeError},
    refbuf::RefBuf,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{
    collections::{BTreeMap, BTreeSet},
    io::{Read, Write},
};

/// What an entry at an address represents.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum EntryType {
    /// Never written.
    Empty,
    /// Definitively filled as a hole.
    Hole,
    /// Ordinary client data.
    Data,
    /// Was present, now trimmed (reserved for a future on-disk compaction;
    /// not produced by this crate today — see spec §9 Q2).
    Trimmed,
}

impl Encode for EntryType {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        let tag: u8 = match self {
            Self::Empty => 0,
            Self::Hole => 1,
            Self::Data => 2,
            Self::Trimmed => 3,
        };
        writer.write_u8(tag)?;
        Ok(())
    }
}

impl Decode for EntryType {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let tag = reader.read_u8()?;
        match tag {
            0 => Ok(Self::Empty),
            1 => Ok(Self::Hole),
            2 => Ok(Self::Data),
            3 => Ok(Self::Trimmed),
            _ => Err(DecodeError::InvalidTag(("EntryType", tag))),
        }
    }
}

/// Well-known metadata keys. Closed per spec §3's `MetaKey ⊇ {...}` — the
/// four named variants are the only ones this crate needs; their contents
/// are opaque to the log unit (it never interprets payload bytes, and it
/// does not interpret metadata values either beyond routing them).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MetaKey {
    /// Set by the client protocol once a write is considered committed.
    Commit,
    /// Paxos-style layout rank carried alongside the entry.
    Rank,
    /// The global-log address this entry also occupies, for REPLEX writes.
    GlobalAddress,
    /// The per-stream addresses this entry also occupies, for REPLEX writes.
    StreamAddresses,
}

impl Encode for MetaKey {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        let tag: u8 = match self {
            Self::Commit => 0,
            Self::Rank => 1,
            Self::GlobalAddress => 2,
            Self::StreamAddresses => 3,
        };
        writer.write_u8(tag)?;
        Ok(())
    }
}

impl Decode for MetaKey {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let tag = reader.read_u8()?;
        match tag {
            0 => Ok(Self::Commit),
            1 => Ok(Self::Rank),
            2 => Ok(Self::GlobalAddress),
            3 => Ok(Self::StreamAddresses),
            _ => Err(DecodeError::InvalidTag(("MetaKey", tag))),
        }
    }
}

/// A metadata value. The log unit stores these without interpreting them,
/// beyond the type tag needed to round-trip through the wire format.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MetaValue {
    /// A single 64-bit scalar (ranks, single addresses, commit flags).
    U64(u64),
    /// A list of 64-bit scalars (e.g. per-stream addresses).
    U64List(Vec<u64>),
}

impl Encode for MetaValue {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        match self {
            Self::U64(v) => {
                writer.write_u8(0)?;
                writer.write_u64::<LittleEndian>(*v)?;
            }
            Self::U64List(vs) => {
                writer.write_u8(1)?;
                #[allow(clippy::cast_possible_truncation)]
                writer.write_u32::<LittleEndian>(vs.len() as u32)?;
                for v in vs {
                    writer.write_u64::<LittleEndian>(*v)?;
                }
            }
        }
        Ok(())
    }
}

impl Decode for MetaValue {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let tag = reader.read_u8()?;
        match tag {
            0 => Ok(Self::U64(reader.read_u64::<LittleEndian>()?)),
            1 => {
                let len = reader.read_u32::<LittleEndian>()?;
                let mut vs = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    vs.push(reader.read_u64::<LittleEndian>()?);
                }
                Ok(Self::U64List(vs))
            }
            _ => Err(DecodeError::InvalidTag(("MetaValue", tag))),
        }
    }
}

/// A log entry: type, payload, the streams it belongs to, per-stream
/// backpointers, and protocol metadata (spec §3 "LogData").
///
/// `Clone` retains the payload buffer rather than sharing it uncounted: the
/// cache's own resident copy is one reference, and every `get()` that clones
/// a copy out to a caller is another, released independently (I6).
#[derive(Debug)]
pub struct LogData {
    /// What kind of entry this is.
    pub entry_type: EntryType,

    /// The payload, if any. `None` for `EMPTY`/`HOLE`/`TRIMMED`.
    pub payload: Option<RefBuf>,

    /// The streams this entry belongs to. Empty means global-only.
    pub streams: BTreeSet<StreamId>,

    /// Per-stream previous address, keyed by stream.
    pub backpointers: BTreeMap<StreamId, u64>,

    /// Protocol metadata (commit bit, rank, REPLEX placements, ...).
    pub metadata: BTreeMap<MetaKey, MetaValue>,
}

impl LogData {
    /// Builds an `EMPTY` marker (never written).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entry_type: EntryType::Empty,
            payload: None,
            streams: BTreeSet::new(),
            backpointers: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Builds a `HOLE` marker.
    #[must_use]
    pub fn hole() -> Self {
        Self {
            entry_type: EntryType::Hole,
            ..Self::empty()
        }
    }

    /// Builds an ordinary `DATA` entry.
    #[must_use]
    pub fn data(payload: RefBuf) -> Self {
        Self {
            entry_type: EntryType::Data,
            payload: Some(payload),
            streams: BTreeSet::new(),
            backpointers: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attaches a stream placement with its backpointer.
    #[must_use]
    pub fn with_stream(mut self, stream: StreamId, backpointer: u64) -> Self {
        self.streams.insert(stream);
        self.backpointers.insert(stream, backpointer);
        self
    }

    /// Returns `true` if this entry is the "never written" marker.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entry_type == EntryType::Empty
    }

    /// Releases this entry's payload reference, if any.
    pub fn release(&self) {
        if let Some(buf) = &self.payload {
            buf.release();
        }
    }
}

impl Clone for LogData {
    fn clone(&self) -> Self {
        Self {
            entry_type: self.entry_type,
            payload: self.payload.as_ref().map(RefBuf::retain),
            streams: self.streams.clone(),
            backpointers: self.backpointers.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_retains_the_payload_buffer() {
        let buf = RefBuf::new(vec![1, 2, 3]);
        let original = LogData::data(buf);

        let copy = original.clone();
        assert_eq!(3, original.payload.as_ref().unwrap().len());

        original.release();
        assert_eq!(
            3,
            copy.payload.as_ref().unwrap().len(),
            "the clone's reference keeps the buffer alive"
        );

        copy.release();
    }

    #[test]
    fn empty_and_hole_carry_no_payload() {
        assert!(LogData::empty().payload.is_none());
        assert!(LogData::hole().payload.is_none());
        assert_eq!(EntryType::Empty, LogData::empty().entry_type);
        assert_eq!(EntryType::Hole, LogData::hole().entry_type);
    }

    #[test]
    fn meta_value_round_trips_through_encode_decode() {
        let values = vec![MetaValue::U64(42), MetaValue::U64List(vec![1, 2, 3])];
        for value in values {
            let bytes = value.encode_into_vec().unwrap();
            let decoded = MetaValue::decode_from(&mut &bytes[..]).unwrap();
            assert_eq!(value, decoded);
        }
    }
}
