//! Provides the thread safe cache used by each group.
use std::sync::Mutex;

use crate::byteview::ByteView;
use crate::lru::LRUCache;

/// Wraps a [LRUCache] of [ByteViews](ByteView) so that it can be shared across tasks.
///
/// Each operation holds a single lock for its whole duration. The underlying store is only
/// created on first use so that a group which never caches anything doesn't allocate any map.
///
/// # Examples
/// ```
/// # use fcache::lru::Cache;
/// # use fcache::byteview::ByteView;
/// let cache = Cache::new(2048);
/// assert_eq!(cache.get("Tom"), None);
///
/// cache.add("Tom", ByteView::from("630"));
/// assert_eq!(cache.get("Tom").unwrap().to_string(), "630");
/// ```
pub struct Cache {
    max_memory: usize,
    lru: Mutex<Option<LRUCache<ByteView>>>,
}

impl Cache {
    /// Creates a new cache which will use up to **max_memory** bytes (0 means unbounded).
    pub fn new(max_memory: usize) -> Self {
        Cache {
            max_memory,
            lru: Mutex::new(None),
        }
    }

    /// Stores the given value for the given key.
    pub fn add(&self, key: &str, value: ByteView) {
        let mut lru = self.lru.lock().unwrap();
        lru.get_or_insert_with(|| LRUCache::new(self.max_memory, None))
            .add(key.to_owned(), value);
    }

    /// Returns the value stored for the given key or **None** if it isn't cached.
    pub fn get(&self, key: &str) -> Option<ByteView> {
        let mut lru = self.lru.lock().unwrap();
        lru.get_or_insert_with(|| LRUCache::new(self.max_memory, None))
            .get(key)
            .cloned()
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.lru.lock().unwrap().as_ref().map_or(0, |lru| lru.len())
    }

    /// Determines if nothing is cached at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of bytes occupied by all cached keys and values.
    pub fn used_memory(&self) -> usize {
        self.lru
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, |lru| lru.used_memory())
    }

    /// Returns the configured capacity in bytes.
    pub fn max_memory(&self) -> usize {
        self.max_memory
    }
}

#[cfg(test)]
mod tests {
    use crate::byteview::ByteView;
    use crate::lru::Cache;
    use std::sync::Arc;

    #[test]
    fn capacity_is_enforced() {
        let cache = Cache::new(10);
        assert_eq!(cache.is_empty(), true);

        cache.add("a", ByteView::from("1234"));
        cache.add("b", ByteView::from("1234"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.used_memory(), 10);

        cache.add("c", ByteView::from("1234"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("c").unwrap().to_string(), "1234");
    }

    #[test]
    fn cache_can_be_shared_across_threads() {
        let cache = Arc::new(Cache::new(0));
        let handles: Vec<_> = (0..8)
            .map(|thread| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let key = format!("{}-{}", thread, i);
                        cache.add(&key, ByteView::from(key.as_str()));
                        assert_eq!(cache.get(&key).unwrap().to_string(), key);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 800);
    }
}
