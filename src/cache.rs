//! Per-container cache.
//!
//! Keys are `(container, path)`; the container half is implicit since each
//! [Container] owns its own [ContainerCache]. Values are opaque byte buffers.
//! A single mutex guards the whole map and is held across the
//! check-populate-use sequence, per spec §4.4, to avoid duplicate
//! passthrough fetches racing each other.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Fail)]
pub enum CacheError {
    #[fail(display = "cache entry for {:?} is missing and population is disallowed here", _0)]
    MissingAndNoPopulate(String),
}

/// A per-container cache of `path -> bytes`. Lifetime equals the owning
/// container's (spec §3); there is no eviction beyond that.
#[derive(Default)]
pub struct ContainerCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl ContainerCache {
    pub fn new() -> Self {
        ContainerCache {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Serves a read at offset 0: returns the cached value if present,
    /// otherwise calls `populate` to fetch it from the kernel (via
    /// passthrough) and caches the result, still under the same lock so a
    /// concurrent reader cannot also miss and fetch (§4.4).
    pub fn read_or_populate<F>(&self, path: &str, populate: F) -> Result<Vec<u8>, CacheError>
    where
        F: FnOnce() -> Result<Vec<u8>, CacheError>,
    {
        let mut entries = self.entries.lock().unwrap();
        if let Some(value) = entries.get(path) {
            return Ok(value.clone());
        }

        let value = populate()?;
        entries.insert(path.to_string(), value.clone());
        Ok(value)
    }

    /// Serves a read at non-zero offset: the cache must already be
    /// populated, since non-zero-offset reads assume a prior offset-0 read
    /// already filled the cache in full (§4.4).
    pub fn read_populated(&self, path: &str) -> Result<Vec<u8>, CacheError> {
        self.entries
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| CacheError::MissingAndNoPopulate(path.to_string()))
    }

    /// Unconditionally overwrites the cached value for `path`, the update a
    /// successful write always performs (§4.4, §4.5).
    pub fn update(&self, path: &str, value: Vec<u8>) {
        self.entries.lock().unwrap().insert(path.to_string(), value);
    }

    /// Returns the cached value without populating, for tests and
    /// diagnostics.
    pub fn peek(&self, path: &str) -> Option<Vec<u8>> {
        self.entries.lock().unwrap().get(path).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn populate_on_miss_then_serve_from_cache() {
        let cache = ContainerCache::new();
        let mut calls = 0;

        let first = cache
            .read_or_populate("/proc/sys/vm/overcommit_memory", || {
                calls += 1;
                Ok(b"0\n".to_vec())
            })
            .unwrap();
        assert_eq!(first, b"0\n");
        assert_eq!(calls, 1);

        let second = cache
            .read_or_populate("/proc/sys/vm/overcommit_memory", || {
                calls += 1;
                Ok(b"should-not-run".to_vec())
            })
            .unwrap();
        assert_eq!(second, b"0\n");
        assert_eq!(calls, 1, "second read must be served from cache");
    }

    #[test]
    fn offset_read_without_prior_populate_fails() {
        let cache = ContainerCache::new();
        assert!(cache.read_populated("/proc/sys/vm/overcommit_memory").is_err());
    }

    #[test]
    fn write_then_read_reflects_new_value() {
        let cache = ContainerCache::new();
        cache.update("/proc/sys/net/core/default_qdisc", b"fq_codel\n".to_vec());

        let value = cache
            .read_or_populate("/proc/sys/net/core/default_qdisc", || {
                panic!("must not repopulate after a write")
            })
            .unwrap();
        assert_eq!(value, b"fq_codel\n");
    }
}
