//! Bounded LRU cache of open log readers
//!
//! Each worker thread owns one `ReaderCache`; caches are never shared, so a
//! reader can't be evicted and closed while another worker is iterating it.
//! The price is that hot files may be open once per worker.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use super::error::{StorageError, StorageResult};
use super::reader::LogReader;

/// Default number of readers kept open per worker
pub const DEFAULT_READER_CAPACITY: usize = 32;

/// A reader the cache can open on a miss and close on eviction
pub trait CachedReader: Sized {
    /// Open the file with a summary-only parse
    fn open(path: &Path) -> StorageResult<Self>;

    /// Release the underlying handle; called exactly once per opened reader
    fn close(self);
}

/// Cache counters, for logs and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub opens: u64,
    pub evictions: u64,
    pub len: usize,
}

/// LRU cache keyed by file path
pub struct ReaderCache<R: CachedReader = LogReader> {
    readers: LruCache<PathBuf, R>,
    stats: CacheStats,
}

impl<R: CachedReader> ReaderCache<R> {
    /// Create a cache holding at most `capacity` readers (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            readers: LruCache::new(capacity),
            stats: CacheStats::default(),
        }
    }

    /// Return the cached reader for `path`, opening it on a miss
    ///
    /// A successful open on a full cache evicts and closes the least
    /// recently used reader.
    pub fn get_reader(&mut self, path: &Path) -> StorageResult<&R> {
        if self.readers.contains(path) {
            self.stats.hits += 1;
        } else {
            let reader = R::open(path)?;
            self.stats.opens += 1;
            if let Some((evicted, old)) = self.readers.push(path.to_path_buf(), reader) {
                tracing::trace!(path = %evicted.display(), "Evicting reader");
                old.close();
                self.stats.evictions += 1;
            }
        }

        self.readers.get(path).ok_or_else(|| {
            StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("reader for {} not cached", path.display()),
            ))
        })
    }

    /// Whether `path` is currently cached
    pub fn contains(&self, path: &Path) -> bool {
        self.readers.contains(path)
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.readers.cap().get()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            len: self.readers.len(),
            ..self.stats
        }
    }

    /// Close every cached reader and empty the cache
    pub fn close_all(&mut self) {
        let mut closed = 0;
        while let Some((_, reader)) = self.readers.pop_lru() {
            reader.close();
            closed += 1;
        }
        if closed > 0 {
            tracing::debug!(closed, "Closed all cached readers");
        }
    }
}

impl<R: CachedReader> Drop for ReaderCache<R> {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::error::StorageError;
    use std::cell::RefCell;
    use std::collections::HashMap;

    thread_local! {
        static OPENED: RefCell<HashMap<PathBuf, u32>> = RefCell::new(HashMap::new());
        static CLOSED: RefCell<HashMap<PathBuf, u32>> = RefCell::new(HashMap::new());
    }

    struct CountingReader {
        path: PathBuf,
    }

    impl CachedReader for CountingReader {
        fn open(path: &Path) -> StorageResult<Self> {
            if path.ends_with("missing.mcap") {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "missing",
                )));
            }
            OPENED.with(|o| *o.borrow_mut().entry(path.to_path_buf()).or_default() += 1);
            Ok(Self {
                path: path.to_path_buf(),
            })
        }

        fn close(self) {
            CLOSED.with(|c| *c.borrow_mut().entry(self.path).or_default() += 1);
        }
    }

    fn opened(path: &Path) -> u32 {
        OPENED.with(|o| o.borrow().get(path).copied().unwrap_or(0))
    }

    fn closed(path: &Path) -> u32 {
        CLOSED.with(|c| c.borrow().get(path).copied().unwrap_or(0))
    }

    fn path(i: usize) -> PathBuf {
        PathBuf::from(format!("/logs/{:03}.mcap", i))
    }

    #[test]
    fn test_hit_does_not_reopen() {
        let mut cache: ReaderCache<CountingReader> = ReaderCache::new(4);

        cache.get_reader(&path(1)).unwrap();
        cache.get_reader(&path(1)).unwrap();

        assert_eq!(opened(&path(1)), 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().opens, 1);
    }

    #[test]
    fn test_33rd_insert_evicts_lru_exactly_once() {
        let mut cache: ReaderCache<CountingReader> = ReaderCache::new(DEFAULT_READER_CAPACITY);

        for i in 0..32 {
            cache.get_reader(&path(i)).unwrap();
        }
        // Touch path 0 so path 1 becomes least recently used
        cache.get_reader(&path(0)).unwrap();
        cache.get_reader(&path(32)).unwrap();

        assert_eq!(cache.len(), 32);
        assert!(!cache.contains(&path(1)));
        assert!(cache.contains(&path(0)));
        assert_eq!(closed(&path(1)), 1);
        assert_eq!(closed(&path(0)), 0);
        assert_eq!(cache.stats().evictions, 1);

        // Re-requesting the evicted path opens it again
        cache.get_reader(&path(1)).unwrap();
        assert_eq!(opened(&path(1)), 2);
        assert_eq!(closed(&path(2)), 1);
    }

    #[test]
    fn test_failed_open_is_not_cached() {
        let mut cache: ReaderCache<CountingReader> = ReaderCache::new(2);
        let missing = PathBuf::from("/logs/missing.mcap");

        assert!(cache.get_reader(&missing).is_err());
        assert!(cache.is_empty());

        // A failed open on a full cache evicts nothing
        cache.get_reader(&path(200)).unwrap();
        cache.get_reader(&path(201)).unwrap();
        assert!(cache.get_reader(&missing).is_err());
        assert_eq!(cache.len(), 2);
        assert_eq!(closed(&path(200)), 0);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_zero_capacity_holds_one_reader() {
        let mut cache: ReaderCache<CountingReader> = ReaderCache::new(0);
        assert_eq!(cache.capacity(), 1);

        cache.get_reader(&path(300)).unwrap();
        cache.get_reader(&path(301)).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(closed(&path(300)), 1);
    }

    #[test]
    fn test_close_all_closes_every_reader_once() {
        let mut cache: ReaderCache<CountingReader> = ReaderCache::new(8);
        let paths: Vec<PathBuf> = (100..105).map(path).collect();
        for p in &paths {
            cache.get_reader(p).unwrap();
        }

        cache.close_all();
        assert!(cache.is_empty());
        for p in &paths {
            assert_eq!(closed(p), 1);
        }

        // Dropping an empty cache closes nothing further
        drop(cache);
        for p in &paths {
            assert_eq!(closed(p), 1);
        }
    }
}
