// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Positional addressing into the shared log.

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use std::io::{Read, Write};

/// A 128-bit opaque stream identifier. No interpretation by the log unit.
#[allow(clippy::module_name_repetitions)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct StreamId(pub uuid::Uuid);

impl StreamId {
    /// Generates a new random stream ID.
    #[must_use]
    pub fn new_random() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the stream ID as a filesystem-safe directory name.
    #[must_use]
    pub fn as_dirname(&self) -> String {
        self.0.as_hyphenated().to_string()
    }
}

impl From<uuid::Uuid> for StreamId {
    fn from(value: uuid::Uuid) -> Self {
        Self(value)
    }
}

impl Encode for StreamId {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_all(self.0.as_bytes())?;
        Ok(())
    }
}

impl Decode for StreamId {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut buf = [0u8; 16];
        reader.read_exact(&mut buf)?;
        Ok(Self(uuid::Uuid::from_bytes(buf)))
    }
}

/// A pair `(address, stream)`. `stream = None` denotes the global log;
/// otherwise a per-stream log.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct LogAddress {
    /// 64-bit positional index into the log
    pub address: u64,

    /// The stream this address belongs to, or `None` for the global log
    pub stream: Option<StreamId>,
}

impl LogAddress {
    /// Creates a global-log address.
    #[must_use]
    pub fn global(address: u64) -> Self {
        Self {
            address,
            stream: None,
        }
    }

    /// Creates a per-stream address.
    #[must_use]
    pub fn stream(address: u64, stream: StreamId) -> Self {
        Self {
            address,
            stream: Some(stream),
        }
    }
}

/// Default number of addresses held per segment file.
pub const SEGMENT_SIZE: u64 = 10_000;

/// Returns the starting address of the segment window containing `address`,
/// given a segment size.
#[must_use]
pub fn segment_start(address: u64, segment_size: u64) -> u64 {
    (address / segment_size) * segment_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_start_buckets_addresses() {
        assert_eq!(0, segment_start(0, SEGMENT_SIZE));
        assert_eq!(0, segment_start(9_999, SEGMENT_SIZE));
        assert_eq!(10_000, segment_start(10_000, SEGMENT_SIZE));
        assert_eq!(10_000, segment_start(19_999, SEGMENT_SIZE));
        assert_eq!(20_000, segment_start(20_000, SEGMENT_SIZE));
    }

    #[test]
    fn log_address_equality() {
        let s = StreamId::new_random();
        assert_eq!(LogAddress::global(5), LogAddress::global(5));
        assert_ne!(LogAddress::global(5), LogAddress::stream(5, s));
        assert_eq!(LogAddress::stream(5, s), LogAddress::stream(5, s));
    }
}
