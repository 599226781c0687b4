// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{DecodeError, EncodeError},
    version::Version,
};

/// Represents errors that can occur in the log unit
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Invalid data format version
    InvalidVersion(Option<Version>),

    /// Serialization failed
    Encode(EncodeError),

    /// Deserialization failed
    Decode(DecodeError),

    /// A durable record already exists for this address; the write was rejected.
    ///
    /// The first writer's record remains authoritative (invariant I5).
    Overwrite,

    /// A multi-stream (REPLEX) write found at least one target address already
    /// occupied. Previously-successful per-stream writes in the same request
    /// remain durable (see spec §7, §9 Q1).
    ReplexOverwrite,

    /// Commit or read-modify target is absent.
    NoEntry,

    /// Header magic mismatch, impossible size fields, or checksum failure.
    ///
    /// Fatal for the single read; the affected segment should be treated as
    /// read-only until operator action.
    Corruption,

    /// The append would push the segment past its configured file size
    /// limit (`Config::max_cache_bytes` is unrelated; see
    /// `Config::file_size_limit`, spec §6 "File size limit").
    SegmentFull,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LogUnitError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::InvalidVersion(_)
            | Self::Overwrite
            | Self::ReplexOverwrite
            | Self::NoEntry
            | Self::Corruption
            | Self::SegmentFull => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Log unit result
pub type Result<T> = std::result::Result<T, Error>;
