//! Provides a memory constrained LRU cache.
//!
//! An LRU cache drops the least recently used entry once the sum of all key lengths and value
//! sizes is about to grow beyond its limit. [LRUCache](LRUCache) is the plain, unsynchronized
//! store which can hold all kinds of values implementing [ByteSize](ByteSize).
//!
//! [Cache](Cache) wraps a store of [ByteViews](crate::byteview::ByteView) behind a single lock
//! and is the local cache used by each [Group](crate::group::Group).
mod cache;
mod lru_cache;

pub use cache::Cache;
pub use lru_cache::ByteSize;
pub use lru_cache::EvictionCallback;
pub use lru_cache::LRUCache;
