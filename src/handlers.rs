// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Static request dispatch, replacing reflection-based handler lookup with
//! a discriminated union and a single match (spec §9 redesign flag).

use crate::{
    address::{LogAddress, StreamId},
    data::EntryType,
    error::{Error, Result},
    log_unit::LogUnit,
};
use std::time::Duration;

/// One inbound request. The transport layer (out of scope here) is
/// responsible for framing bytes into these.
pub enum Request {
    /// Single-address write, global or per-stream.
    Write { address: LogAddress, payload: Vec<u8> },
    /// Multi-stream write of the same payload (REPLEX).
    WriteReplex { placements: Vec<(StreamId, u64)>, payload: Vec<u8> },
    /// Inclusive address range read.
    Read { lo: LogAddress, hi: LogAddress },
    /// Marks an address committed.
    Commit { address: LogAddress },
    /// Fills an address with a hole marker.
    FillHole { address: LogAddress },
    /// Advances a stream's trim mark.
    Trim { stream: StreamId, prefix: u64 },
    /// Requests an immediate GC sweep.
    ForceGc,
    /// Updates the GC sweep cadence.
    GcInterval { interval: Duration },
}

/// One outbound response, or [`Error`] translated by the caller into a
/// wire-level error code.
pub enum Response {
    WriteOk,
    ReadResult(Vec<(u64, EntryType, Option<Vec<u8>>)>),
    Ack,
}

/// Dispatches `request` against `unit`, returning the outcome or the error
/// the caller maps to a wire-level error code (OVERWRITE_ERROR,
/// REPLEX_OVERWRITE_ERROR, NOENTRY_ERROR, DATA_CORRUPTION_ERROR,
/// SEGMENT_FULL_ERROR, ...).
pub fn dispatch(unit: &LogUnit, request: Request) -> Result<Response> {
    match request {
        Request::Write { address, payload } => {
            unit.write(address, payload)?;
            Ok(Response::WriteOk)
        }

        Request::WriteReplex { placements, payload } => {
            unit.write_replex(&placements, &payload)?;
            Ok(Response::WriteOk)
        }

        Request::Read { lo, hi } => {
            if lo.stream != hi.stream || lo.address > hi.address {
                return Err(Error::NoEntry);
            }

            let mut results = Vec::with_capacity((hi.address - lo.address + 1) as usize);
            for addr in lo.address..=hi.address {
                let address = LogAddress {
                    address: addr,
                    stream: lo.stream,
                };
                let entry = unit.read(address)?;
                let payload = entry
                    .payload
                    .as_ref()
                    .and_then(|p| p.as_arc())
                    .map(|bytes| bytes.to_vec());
                results.push((addr, entry.entry_type, payload));
                entry.release();
            }
            Ok(Response::ReadResult(results))
        }

        Request::Commit { address } => {
            unit.commit(address)?;
            Ok(Response::Ack)
        }

        Request::FillHole { address } => {
            unit.fill_hole(address)?;
            Ok(Response::WriteOk)
        }

        Request::Trim { stream, prefix } => {
            unit.trim(stream, prefix);
            Ok(Response::Ack)
        }

        Request::ForceGc => {
            unit.force_gc();
            Ok(Response::Ack)
        }

        Request::GcInterval { interval } => {
            unit.set_gc_interval(interval);
            Ok(Response::Ack)
        }
    }
}
