// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Background trim/GC sweep (spec §2 component E, §5).

use crate::{address::LogAddress, cache::WriteThroughCache, trim::TrimMap};
use std::{
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
    time::Duration,
};

/// Control messages accepted by the GC engine's background thread.
enum Signal {
    ForceGc,
    SetInterval(Duration),
    Shutdown,
}

/// A handle to the running GC background thread. Dropping it does not stop
/// the thread; call [`GcEngine::shutdown`] explicitly.
pub struct GcEngine {
    sender: mpsc::Sender<Signal>,
    join: Option<JoinHandle<()>>,
}

impl GcEngine {
    /// Spawns the background sweep thread, running every `interval` until
    /// [`GcEngine::shutdown`] is called.
    #[must_use]
    pub fn spawn(cache: Arc<WriteThroughCache>, trim_map: Arc<TrimMap>, interval: Duration) -> Self {
        let (sender, receiver) = mpsc::channel();

        let join = thread::spawn(move || {
            let mut interval = interval;

            loop {
                match receiver.recv_timeout(interval) {
                    Ok(Signal::ForceGc) => sweep(&cache, &trim_map),
                    Ok(Signal::SetInterval(new_interval)) => interval = new_interval,
                    Ok(Signal::Shutdown) => return,
                    Err(mpsc::RecvTimeoutError::Timeout) => sweep(&cache, &trim_map),
                    Err(mpsc::RecvTimeoutError::Disconnected) => return,
                }
            }
        });

        Self {
            sender,
            join: Some(join),
        }
    }

    /// Requests an immediate sweep, outside the normal cadence.
    pub fn force_gc(&self) {
        let _ = self.sender.send(Signal::ForceGc);
    }

    /// Changes the sweep cadence, effective from the next wait.
    pub fn set_interval(&self, interval: Duration) {
        let _ = self.sender.send(Signal::SetInterval(interval));
    }

    /// Stops the background thread and waits for it to exit.
    pub fn shutdown(&mut self) {
        let _ = self.sender.send(Signal::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for GcEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One sweep pass: snapshot the cache's resident keys, and for any entry
/// whose streams are all trimmed past its address, invalidate it.
///
/// A global-only entry (empty stream set) is never evicted by this pass —
/// it has no stream to be trimmed on (spec §5, documented quirk).
fn sweep(cache: &WriteThroughCache, trim_map: &TrimMap) {
    for address in cache.keys_snapshot() {
        let Some(entry) = cache.peek(&address) else {
            continue;
        };

        if entry.streams.is_empty() {
            entry.release();
            continue;
        }

        let trimmable = entry
            .streams
            .iter()
            .all(|stream| trim_map.is_trimmed(stream, address.address));

        entry.release();

        if trimmable {
            cache.invalidate(&address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{address::StreamId, cache::Backing, data::LogData, error::Result, refbuf::RefBuf};

    struct NullBacking;

    impl Backing for NullBacking {
        fn load(&self, _address: &LogAddress) -> Result<LogData> {
            Ok(LogData::empty())
        }

        fn write(&self, _address: &LogAddress, _entry: &LogData) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sweep_evicts_only_fully_trimmed_entries() {
        let cache = WriteThroughCache::new(10_000);
        let backing = NullBacking;
        let trim_map = TrimMap::new();

        let stream = StreamId::new_random();
        let addr = LogAddress::stream(5, stream);
        cache
            .put(
                &addr,
                LogData::data(RefBuf::new(b"x".to_vec())).with_stream(stream, 0),
                &backing,
            )
            .unwrap();

        sweep(&cache, &trim_map);
        assert!(cache.peek(&addr).is_some(), "not trimmed yet, stays cached");

        trim_map.put_max(stream, 5);
        sweep(&cache, &trim_map);
        assert!(cache.peek(&addr).is_none(), "trimmed, evicted");
    }

    #[test]
    fn global_only_entry_is_never_swept() {
        let cache = WriteThroughCache::new(10_000);
        let backing = NullBacking;
        let trim_map = TrimMap::new();

        let addr = LogAddress::global(1);
        cache
            .put(&addr, LogData::data(RefBuf::new(b"g".to_vec())), &backing)
            .unwrap();

        sweep(&cache, &trim_map);
        assert!(cache.peek(&addr).is_some(), "global-only entries are never GCed");
    }

    #[test]
    fn engine_shuts_down_cleanly() {
        let cache = Arc::new(WriteThroughCache::new(10_000));
        let trim_map = Arc::new(TrimMap::new());
        let mut engine = GcEngine::spawn(cache, trim_map, Duration::from_secs(60));
        engine.force_gc();
        engine.shutdown();
    }
}
