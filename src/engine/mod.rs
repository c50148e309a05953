//! Per-node storage engine
//!
//! A persistent key-value map (sled) fronted by a membership filter: a bloom
//! filter over BLAKE3 key digests that lets `get` answer "definitely absent"
//! without touching the store. The filter can produce false positives but
//! never false negatives, so a positive answer only means the real lookup
//! must run.
//!
//! Deletes remove the key from sled but cannot retract the filter entry, so
//! a deleted key's lookup pays the full read path and still correctly comes
//! back `None`. That lingering entry is a performance caveat, not a
//! correctness one.

use bloomfilter::Bloom;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::common::{key_digest, Error, Result};

/// Engine statistics, mostly for tests and status reporting.
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub write_count: u64,
    pub key_count: usize,
}

/// Persistent key->value map with a probabilistic fast-negative path.
pub struct StorageEngine {
    db: sled::Db,
    /// Guards the filter-insert-then-db-write sequence so concurrent puts
    /// cannot leave a key in sled that the filter has not seen.
    filter: Mutex<Bloom<[u8; 32]>>,
    write_count: AtomicU64,
}

impl StorageEngine {
    /// Open (or create) the engine at `path`, sizing the membership filter
    /// for `expected_keys` insertions at `fp_rate` false positives.
    ///
    /// On reopen the filter is re-seeded from the keys already in the store;
    /// a previously-put key must never be filtered out.
    pub fn open(path: &Path, expected_keys: usize, fp_rate: f64) -> Result<Self> {
        let db = sled::open(path)?;

        let mut filter: Bloom<[u8; 32]> = Bloom::new_for_fp_rate(expected_keys, fp_rate)
            .map_err(|e| Error::InvalidConfig(format!("membership filter sizing: {}", e)))?;

        let mut existing = 0usize;
        for entry in db.iter() {
            let (key, _) = entry?;
            let key = std::str::from_utf8(&key)
                .map_err(|_| Error::Corrupted("non-UTF-8 key in store".into()))?;
            filter.set(&key_digest(key));
            existing += 1;
        }

        tracing::info!(
            path = %path.display(),
            keys = existing,
            "storage engine opened"
        );

        Ok(Self {
            db,
            filter: Mutex::new(filter),
            write_count: AtomicU64::new(0),
        })
    }

    /// Write a value. Overwrites are allowed and counted.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        validate_key(key)?;

        // Filter first: a key visible in sled must already be visible in
        // the filter, never the other way around.
        let mut filter = self.filter.lock().unwrap();
        filter.set(&key_digest(key));
        self.db.insert(key.as_bytes(), value)?;
        drop(filter);

        self.write_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Read a value. `Ok(None)` means the key is not stored; the membership
    /// filter short-circuits lookups for keys it has never seen.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;

        let maybe_present = self.filter.lock().unwrap().check(&key_digest(key));
        if !maybe_present {
            return Ok(None);
        }

        Ok(self.db.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    /// Remove a key from the persistent store. The membership filter keeps
    /// its entry; bloom filters do not support removal.
    pub fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.db.remove(key.as_bytes())?;
        Ok(())
    }

    /// Flush the store. Safe to call more than once.
    pub fn close(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Successful writes since this engine instance was opened.
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            write_count: self.write_count(),
            key_count: self.db.len(),
        }
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::Validation("key cannot be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_engine(dir: &TempDir) -> StorageEngine {
        StorageEngine::open(&dir.path().join("db"), 10_000, 0.01).unwrap()
    }

    #[test]
    fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        engine.put("k1", b"v1").unwrap();
        assert_eq!(engine.get("k1").unwrap().unwrap(), b"v1");

        engine.delete("k1").unwrap();
        assert_eq!(engine.get("k1").unwrap(), None);
    }

    #[test]
    fn test_overwrite_is_counted() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        engine.put("k1", b"v1").unwrap();
        engine.put("k1", b"v2").unwrap();
        assert_eq!(engine.get("k1").unwrap().unwrap(), b"v2");
        assert_eq!(engine.write_count(), 2);
    }

    #[test]
    fn test_empty_key_rejected() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        assert!(matches!(engine.put("", b"v"), Err(Error::Validation(_))));
        assert!(matches!(engine.get(""), Err(Error::Validation(_))));
        assert!(matches!(engine.delete(""), Err(Error::Validation(_))));
    }

    #[test]
    fn test_empty_value_allowed() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        engine.put("k1", b"").unwrap();
        assert_eq!(engine.get("k1").unwrap().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_filter_never_hides_a_put_key() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        for i in 0..500 {
            engine.put(&format!("key_{}", i), b"value").unwrap();
        }
        for i in 0..500 {
            assert!(engine.get(&format!("key_{}", i)).unwrap().is_some());
        }
    }

    #[test]
    fn test_deleted_key_still_not_found_despite_filter_entry() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        engine.put("doomed", b"v").unwrap();
        engine.delete("doomed").unwrap();
        // The filter still answers "maybe present"; the real lookup decides.
        assert_eq!(engine.get("doomed").unwrap(), None);
    }

    #[test]
    fn test_negative_lookup() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        engine.put("present", b"v").unwrap();
        assert_eq!(engine.get("never-written").unwrap(), None);
    }

    #[test]
    fn test_reopen_reseeds_filter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");

        {
            let engine = StorageEngine::open(&path, 10_000, 0.01).unwrap();
            engine.put("survivor", b"v1").unwrap();
            engine.close().unwrap();
        }

        let engine = StorageEngine::open(&path, 10_000, 0.01).unwrap();
        // Filter was rebuilt from the store; the key must still be visible.
        assert_eq!(engine.get("survivor").unwrap().unwrap(), b"v1");
        // Write counter is per-instance.
        assert_eq!(engine.write_count(), 0);
    }

    #[test]
    fn test_close_idempotent() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);
        engine.close().unwrap();
        engine.close().unwrap();
    }

    #[test]
    fn test_stats() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);
        engine.put("a", b"1").unwrap();
        engine.put("b", b"2").unwrap();
        let stats = engine.stats();
        assert_eq!(stats.write_count, 2);
        assert_eq!(stats.key_count, 2);
    }
}
