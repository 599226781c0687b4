// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Typed startup configuration, replacing a name-to-any option map with a
//! value constructed once and passed explicitly (spec §9 redesign flag).

use crate::segment::{DEFAULT_FILE_SIZE_LIMIT, TEST_MODE_FILE_SIZE_LIMIT};
use path_absolutize::Absolutize;
use std::{path::PathBuf, time::Duration};

/// Default GC sweep period.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_millis(60_000);

/// Default cache weight cap: 64 MiB.
pub const DEFAULT_MAX_CACHE_BYTES: u64 = 64 * 1024 * 1024;

/// Startup configuration for a [`crate::LogUnit`].
#[derive(Debug, Clone)]
pub struct Config {
    memory: bool,
    log_path: Option<PathBuf>,
    no_verify: bool,
    max_cache_bytes: u64,
    quickcheck_test_mode: bool,
    gc_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory: false,
            log_path: None,
            no_verify: false,
            max_cache_bytes: DEFAULT_MAX_CACHE_BYTES,
            quickcheck_test_mode: false,
            gc_interval: DEFAULT_GC_INTERVAL,
        }
    }
}

impl Config {
    /// Starts from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// If `true`, segments are kept purely in memory; nothing touches disk
    /// and all data is lost on exit.
    #[must_use]
    pub fn memory(mut self, memory: bool) -> Self {
        self.memory = memory;
        self
    }

    /// Base directory for on-disk logs. Ignored when `memory` is set.
    /// Stored as an absolute path, so the layout on disk doesn't change if
    /// the process's working directory does between restarts.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.log_path = Some(
            path.absolutize()
                .map_or_else(|_| path.clone(), |cow| cow.into_owned()),
        );
        self
    }

    /// Skips per-record checksum verification on read.
    #[must_use]
    pub fn no_verify(mut self, no_verify: bool) -> Self {
        self.no_verify = no_verify;
        self
    }

    /// Sets the cache weight cap, in bytes.
    #[must_use]
    pub fn max_cache_bytes(mut self, bytes: u64) -> Self {
        self.max_cache_bytes = bytes;
        self
    }

    /// Reduces the default segment file size limit to ~4 MiB, for
    /// environments where sparse files are expensive to allocate.
    #[must_use]
    pub fn quickcheck_test_mode(mut self, enabled: bool) -> Self {
        self.quickcheck_test_mode = enabled;
        self
    }

    /// Sets the GC sweep period.
    #[must_use]
    pub fn gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }

    pub(crate) fn is_memory(&self) -> bool {
        self.memory
    }

    pub(crate) fn log_dir(&self) -> Option<&std::path::Path> {
        self.log_path.as_deref()
    }

    pub(crate) fn is_no_verify(&self) -> bool {
        self.no_verify
    }

    pub(crate) fn max_cache_bytes_value(&self) -> u64 {
        self.max_cache_bytes
    }

    pub(crate) fn gc_interval_value(&self) -> Duration {
        self.gc_interval
    }

    /// The effective file size limit given `quickcheck_test_mode`.
    #[must_use]
    pub fn file_size_limit(&self) -> u64 {
        if self.quickcheck_test_mode {
            TEST_MODE_FILE_SIZE_LIMIT
        } else {
            DEFAULT_FILE_SIZE_LIMIT
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::new();
        assert!(!config.is_memory());
        assert!(!config.is_no_verify());
        assert_eq!(DEFAULT_MAX_CACHE_BYTES, config.max_cache_bytes_value());
        assert_eq!(DEFAULT_GC_INTERVAL, config.gc_interval_value());
        assert_eq!(DEFAULT_FILE_SIZE_LIMIT, config.file_size_limit());
    }

    #[test]
    fn log_path_is_stored_absolute() {
        let config = Config::new().log_path("relative/subdir");
        assert!(config.log_dir().unwrap().is_absolute());
    }

    #[test]
    fn quickcheck_test_mode_shrinks_file_size_limit() {
        let config = Config::new().quickcheck_test_mode(true);
        assert_eq!(TEST_MODE_FILE_SIZE_LIMIT, config.file_size_limit());
    }

    #[test]
    fn builder_methods_compose() {
        let config = Config::new()
            .memory(true)
            .no_verify(true)
            .max_cache_bytes(128)
            .gc_interval(Duration::from_millis(10));

        assert!(config.is_memory());
        assert!(config.is_no_verify());
        assert_eq!(128, config.max_cache_bytes_value());
        assert_eq!(Duration::from_millis(10), config.gc_interval_value());
    }
}
