use linked_hash_map::LinkedHashMap;

/// Returns the amount of memory occupied by a cached value.
pub trait ByteSize {
    /// Returns the size of the value in bytes.
    ///
    /// Together with the length of its key, this is what an entry contributes to the used memory
    /// of a [LRUCache].
    fn byte_size(&self) -> usize;
}

impl ByteSize for String {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

/// Invoked with the key and value of each entry which is evicted from a [LRUCache].
pub type EvictionCallback<V> = Box<dyn FnMut(String, V) + Send>;

/// Provides a memory constrained LRU cache.
///
/// A cache behaves just like a **Map** as long as there is no shortage in storage. However, once
/// the sum of all key lengths and value sizes exceeds **max_memory**, old (least recently used)
/// entries will be evicted - hence the name LRU cache. A **max_memory** of 0 disables eviction
/// altogether.
///
/// Note that the cache itself isn't synchronized. See [Cache](crate::lru::Cache) for a thread safe
/// wrapper.
///
/// # Examples
/// ```
/// # use fcache::lru::LRUCache;
/// // Specifies a cache which can store up to 16 bytes of keys and values.
/// let mut lru = LRUCache::new(16, None);
///
/// lru.add("Foo".to_owned(), "Bar".to_owned());
/// assert_eq!(lru.get("Foo").unwrap(), &"Bar".to_owned());
///
/// // this will still fit..
/// lru.add("Foo1".to_owned(), "X".repeat(4));
/// assert_eq!(lru.used_memory(), 14);
///
/// // this will hit the max memory constraint...
/// lru.add("Foo2".to_owned(), "Y".repeat(4));
/// // ..and therefore will throw the least recently used entry out:
/// assert_eq!(lru.get("Foo").is_some(), false);
/// assert_eq!(lru.get("Foo1").is_some(), true);
/// assert_eq!(lru.get("Foo2").is_some(), true);
///```
pub struct LRUCache<V: ByteSize> {
    used_memory: usize,
    max_memory: usize,
    map: LinkedHashMap<String, Entry<V>>,
    on_evicted: Option<EvictionCallback<V>>,
}

struct Entry<V: ByteSize> {
    mem_size: usize,
    value: V,
}

impl<V: ByteSize> LRUCache<V> {
    /// Creates a new cache which may use up to **max_memory** bytes.
    ///
    /// If an eviction callback is given, it is invoked synchronously for each evicted entry.
    /// As this happens within [add](LRUCache::add), the callback must not try to access the
    /// cache which is currently evicting.
    pub fn new(max_memory: usize, on_evicted: Option<EvictionCallback<V>>) -> Self {
        LRUCache {
            used_memory: 0,
            max_memory,
            map: LinkedHashMap::new(),
            on_evicted,
        }
    }

    /// Stores the given value for the given key.
    ///
    /// If the key is already present, its value is replaced and the entry becomes the most
    /// recently used one. Afterwards, the least recently used entries are evicted until the
    /// memory constraint is fulfilled again.
    ///
    /// Note that replacing a value subtracts the size of the previous entry, so that
    /// **used_memory** always matches the sum of all live entries.
    ///
    /// # Examples
    /// ```
    /// # use fcache::lru::LRUCache;
    /// let mut lru = LRUCache::new(0, None);
    ///
    /// lru.add("Foo".to_owned(), "Bar".to_owned());
    /// lru.add("Foo".to_owned(), "Barbara".to_owned());
    /// assert_eq!(lru.len(), 1);
    /// assert_eq!(lru.used_memory(), 10);
    /// ```
    pub fn add(&mut self, key: String, value: V) {
        let entry = Entry {
            mem_size: key.len() + value.byte_size(),
            value,
        };

        self.used_memory += entry.mem_size;

        // Inserting an existing key replaces the value and moves it to the back, which is the
        // most recently used end of the map...
        if let Some(stale_entry) = self.map.insert(key, entry) {
            self.used_memory -= stale_entry.mem_size;
        }

        self.enforce_constraints();
    }

    fn enforce_constraints(&mut self) {
        while self.max_memory != 0 && self.used_memory > self.max_memory {
            if !self.remove_oldest() {
                break;
            }
        }
    }

    /// Returns the value which has previously been stored for the given key or **None** if
    /// no value is present.
    ///
    /// A hit marks the entry as most recently used.
    ///
    /// # Examples
    /// ```
    /// # use fcache::lru::LRUCache;
    /// let mut lru = LRUCache::new(12, None);
    /// lru.add("A".to_owned(), "Alpha".to_owned());
    /// lru.add("B".to_owned(), "Bravo".to_owned());
    ///
    /// // Touch "A" so that "B" becomes the least recently used entry...
    /// assert_eq!(lru.get("A").unwrap(), "Alpha");
    /// lru.add("C".to_owned(), "C".to_owned());
    ///
    /// assert_eq!(lru.get("A").is_some(), true);
    /// assert_eq!(lru.get("B").is_some(), false);
    /// ```
    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.map.get_refresh(key).map(|entry| &entry.value)
    }

    /// Evicts the least recently used entry.
    ///
    /// Returns **true** if an entry was evicted or **false** if the cache was empty.
    pub fn remove_oldest(&mut self) -> bool {
        match self.map.pop_front() {
            Some((key, entry)) => {
                self.used_memory -= entry.mem_size;
                if let Some(callback) = self.on_evicted.as_mut() {
                    callback(key, entry.value);
                }
                true
            }
            None => false,
        }
    }

    /// Returns the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Determines if the cache is completely empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the maximal amount of memory to be occupied by this cache (0 means unbounded).
    pub fn max_memory(&self) -> usize {
        self.max_memory
    }

    /// Returns the sum of all key lengths and value sizes of the entries in this cache.
    pub fn used_memory(&self) -> usize {
        self.used_memory
    }
}
