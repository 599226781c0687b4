//! S5: torn-write crash recovery. A process kill between the record header
//! write and the WRITTEN-flag rewrite must recover the address as EMPTY, not
//! as a half-written record, and must leave it writable afterwards.

use log_unit::{Config, EntryType, LogAddress, LogUnit};
use std::io::{Seek, SeekFrom, Write};
use test_log::test;

#[test]
fn s5_torn_write_recovers_as_empty_and_stays_writable() -> log_unit::Result<()> {
    let dir = tempfile::tempdir()?;

    {
        let unit = LogUnit::open(Config::new().log_path(dir.path()))?;
        unit.write(LogAddress::global(1), b"committed".to_vec())?;
        unit.shutdown();
    }

    // The global log's segment 0 file, named by its zero-padded start
    // address, directly under the configured log path.
    let segment_path = dir.path().join(format!("{:020}", 0));
    assert!(segment_path.exists(), "segment file should exist by now");

    // Simulate a crash: append a record header with the WRITTEN flag clear,
    // plus a body, but never rewrite the header with the flag set.
    {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(&segment_path)?;
        let tail = file.seek(SeekFrom::End(0))?;

        // HEADER: magic 'L''E', flags=0 (unwritten), addr=2 (LE u64),
        // size=5 (LE u32), meta_size=0 (LE u32), checksum (LE u32).
        let payload = b"later";
        let checksum = crc32c::crc32c(payload);

        let mut header = Vec::with_capacity(24);
        header.extend_from_slice(b"LE");
        header.extend_from_slice(&0u16.to_le_bytes());
        header.extend_from_slice(&2u64.to_le_bytes());
        header.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        header.extend_from_slice(&checksum.to_le_bytes());

        file.seek(SeekFrom::Start(tail))?;
        file.write_all(&header)?;
        file.write_all(payload)?;
        file.sync_all()?;
    }

    let unit = LogUnit::open(Config::new().log_path(dir.path()))?;

    let recovered_committed = unit.read(LogAddress::global(1))?;
    assert_eq!(EntryType::Data, recovered_committed.entry_type);
    recovered_committed.release();

    let recovered_torn = unit.read(LogAddress::global(2))?;
    assert_eq!(
        EntryType::Empty,
        recovered_torn.entry_type,
        "torn write must recover as EMPTY, not as data"
    );
    recovered_torn.release();

    unit.write(LogAddress::global(2), b"retried".to_vec())?;
    let entry = unit.read(LogAddress::global(2))?;
    assert_eq!(
        entry.payload.as_ref().and_then(|p| p.as_arc()).as_deref(),
        Some(b"retried".as_slice())
    );
    entry.release();

    Ok(())
}
