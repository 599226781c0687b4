// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! On-disk record framing: `HEADER ENTRY`.
//!
//! ```text
//! HEADER := 'L' 'E' FLAGS(u16) ADDR(u64) SIZE(u32) META_SIZE(u32) CHECKSUM(u32)
//! ENTRY  := META(META_SIZE bytes) PAYLOAD(SIZE - META_SIZE bytes)
//! ```
//!
//! All multi-byte integers are little-endian. `CHECKSUM` is CRC32C over
//! `META || PAYLOAD`, stored in the header's reserved bytes so it's known
//! before the entry body is read.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

pub(crate) const MAGIC: [u8; 2] = [b'L', b'E'];

/// Header size in bytes: magic(2) + flags(2) + addr(8) + size(4) + meta_size(4) + checksum(4).
pub(crate) const HEADER_LEN: u64 = 24;

/// Bit 0 of FLAGS. Set last, after the entry body is fsynced.
pub(crate) const FLAG_WRITTEN: u16 = 0b0000_0001;

/// A parsed, fixed-size record header.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct Header {
    pub flags: u16,
    pub addr: u64,
    pub size: u32,
    pub meta_size: u32,
    pub checksum: u32,
}

impl Header {
    pub(crate) fn is_written(self) -> bool {
        self.flags & FLAG_WRITTEN != 0
    }

    pub(crate) fn write<W: Write>(self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&MAGIC)?;
        writer.write_u16::<LittleEndian>(self.flags)?;
        writer.write_u64::<LittleEndian>(self.addr)?;
        writer.write_u32::<LittleEndian>(self.size)?;
        writer.write_u32::<LittleEndian>(self.meta_size)?;
        writer.write_u32::<LittleEndian>(self.checksum)?;
        Ok(())
    }

    /// Reads and validates a full header. Returns `Ok(None)` if fewer than
    /// `HEADER_LEN` bytes remain — whether that's a clean end-of-segment or
    /// a header torn mid-write, the caller treats both as "stop scanning
    /// here" and rewinds to the position before this call.
    pub(crate) fn read<R: Read>(reader: &mut R) -> std::io::Result<Option<Self>> {
        let mut buf = [0u8; HEADER_LEN as usize];
        let mut filled = 0;

        while filled < buf.len() {
            match reader.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }

        if filled < buf.len() {
            return Ok(None);
        }

        if buf[0..2] != MAGIC {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "record header magic mismatch",
            ));
        }

        let mut cursor = &buf[2..];
        let flags = cursor.read_u16::<LittleEndian>()?;
        let addr = cursor.read_u64::<LittleEndian>()?;
        let size = cursor.read_u32::<LittleEndian>()?;
        let meta_size = cursor.read_u32::<LittleEndian>()?;
        let checksum = cursor.read_u32::<LittleEndian>()?;

        Ok(Some(Self {
            flags,
            addr,
            size,
            meta_size,
            checksum,
        }))
    }
}

/// Computes the CRC32C checksum of `meta || payload`.
#[must_use]
pub(crate) fn checksum(meta: &[u8], payload: &[u8]) -> u32 {
    let crc = crc32c::crc32c(meta);
    crc32c::crc32c_append(crc, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = Header {
            flags: FLAG_WRITTEN,
            addr: 1234,
            size: 10,
            meta_size: 3,
            checksum: 0xDEAD_BEEF,
        };

        let mut bytes = vec![];
        header.write(&mut bytes).unwrap();
        assert_eq!(bytes.len() as u64, HEADER_LEN);

        let parsed = Header::read(&mut &bytes[..]).unwrap().unwrap();
        assert_eq!(header, parsed);
        assert!(parsed.is_written());
    }

    #[test]
    fn unwritten_flag_is_not_written() {
        let header = Header {
            flags: 0,
            addr: 0,
            size: 0,
            meta_size: 0,
            checksum: 0,
        };
        assert!(!header.is_written());
    }

    #[test]
    fn clean_eof_yields_none() {
        let mut empty: &[u8] = &[];
        assert!(Header::read(&mut empty).unwrap().is_none());
    }

    #[test]
    fn bad_magic_is_an_error() {
        let bytes = [b'X', b'Y', 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let err = Header::read(&mut &bytes[..]).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn checksum_is_order_sensitive() {
        let a = checksum(b"meta", b"payload");
        let b = checksum(b"payload", b"meta");
        assert_ne!(a, b);
    }
}
