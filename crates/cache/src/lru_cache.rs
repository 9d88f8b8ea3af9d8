//! In-memory cache tier

use crate::interface::CacheInterface;
use crate::{Error, Result};
use lru::LruCache as Entries;
use parking_lot::Mutex;
use tracing::trace;

struct State {
    entries: Entries<String, Vec<u8>>,
    byte_size: usize,
    evictions: u64,
}

fn entry_size(key: &str, value: &[u8]) -> usize {
    key.len() + value.len()
}

/// Thread-safe LRU store bounded by total key and value bytes
pub struct LruCache {
    name: String,
    max_bytes: usize,
    state: Mutex<State>,
}

impl std::fmt::Debug for LruCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LruCache")
            .field("name", &self.name)
            .field("entries", &state.entries.len())
            .field("byte_size", &state.byte_size)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}

impl LruCache {
    /// Create an empty cache holding at most `max_bytes`
    #[must_use]
    pub fn new(name: impl Into<String>, max_bytes: usize) -> Self {
        Self {
            name: name.into(),
            max_bytes,
            state: Mutex::new(State {
                entries: Entries::unbounded(),
                byte_size: 0,
                evictions: 0,
            }),
        }
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Bytes of keys and values held
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.state.lock().byte_size
    }

    /// Entries evicted to make room so far
    #[must_use]
    pub fn num_evictions(&self) -> u64 {
        self.state.lock().evictions
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.byte_size = 0;
    }
}

impl CacheInterface for LruCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.state.lock().entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let size = entry_size(key, &value);
        if size > self.max_bytes {
            return Err(Error::value_too_large(key, size, self.max_bytes));
        }

        let mut state = self.state.lock();
        if let Some(old) = state.entries.put(key.to_string(), value) {
            state.byte_size -= entry_size(key, &old);
        }
        state.byte_size += size;
        while state.byte_size > self.max_bytes {
            let Some((evicted_key, evicted)) = state.entries.pop_lru() else {
                break;
            };
            state.byte_size -= entry_size(&evicted_key, &evicted);
            state.evictions += 1;
            trace!(cache = %self.name, key = %evicted_key, "Evicted");
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(old) = state.entries.pop(key) {
            state.byte_size -= entry_size(key, &old);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let cache = LruCache::new("lru", 100);
        cache.put("a", b"1".to_vec()).unwrap();
        assert_eq!(cache.get("a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(cache.get("b").unwrap(), None);
        assert_eq!(cache.byte_size(), 2);

        cache.put("a", b"123".to_vec()).unwrap();
        assert_eq!(cache.byte_size(), 4);
        assert_eq!(cache.len(), 1);

        cache.delete("a").unwrap();
        cache.delete("a").unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.byte_size(), 0);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = LruCache::new("lru", 10);
        cache.put("a", b"1111".to_vec()).unwrap();
        cache.put("b", b"2222".to_vec()).unwrap();
        // Touch a so b is the eviction candidate
        cache.get("a").unwrap();
        cache.put("c", b"3333".to_vec()).unwrap();

        assert!(cache.get("a").unwrap().is_some());
        assert!(cache.get("b").unwrap().is_none());
        assert!(cache.get("c").unwrap().is_some());
        assert_eq!(cache.num_evictions(), 1);
        assert!(cache.byte_size() <= 10);
    }

    #[test]
    fn test_rejects_oversized_value() {
        let cache = LruCache::new("lru", 4);
        let err = cache.put("key", b"value".to_vec()).unwrap_err();
        assert!(matches!(err, Error::ValueTooLarge { size: 8, limit: 4, .. }));
        assert!(cache.is_empty());
    }
}
