//! Provides groups, the named cache namespaces, along with the registry which keeps track of them.
//!
//! A [Group] combines a backing [Getter] with a local [Cache] and (optionally) a
//! [PeerPicker]. A lookup first checks the local cache. On a miss, concurrent lookups for the
//! same key are collapsed via [SingleFlight], so that only one of them actually asks the owning
//! peer or the backing getter. Values loaded by the local getter are then cached locally.
//!
//! Failed loads are never cached. Therefore a subsequent lookup will invoke the getter again.
//!
//! # Examples
//! ```
//! # use fcache::group::{Groups, GetterFunc};
//! # use fcache::error::CacheError;
//! # #[tokio::main]
//! # async fn main() {
//! let groups = Groups::new();
//! let group = groups.new_group(
//!     "scores",
//!     2048,
//!     GetterFunc::new(|key: &str| match key {
//!         "Tom" => Ok(b"630".to_vec()),
//!         _ => Err(CacheError::not_found(key)),
//!     }),
//! );
//!
//! assert_eq!(group.get("Tom").await.unwrap().to_string(), "630");
//! assert_eq!(group.get("Absent").await.is_err(), true);
//! assert_eq!(groups.find("scores").is_some(), true);
//! # }
//! ```
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use crate::byteview::ByteView;
use crate::error::CacheError;
use crate::fmt::format_size;
use crate::lru::Cache;
use crate::peers::{PeerGetter, PeerPicker};
use crate::protocol::FetchRequest;
use crate::singleflight::SingleFlight;

/// Loads the value of a key from the backing data source.
///
/// The getter is invoked on a cache miss (of the node owning the key). Use
/// [CacheError::not_found] to signal that the source doesn't know the key. Any other error
/// is simply converted via `?` from an **anyhow::Error**.
#[async_trait::async_trait]
pub trait Getter: Send + Sync {
    /// Returns the value for the given key.
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError>;
}

/// Permits to use a plain function or closure as [Getter].
pub struct GetterFunc<F> {
    func: F,
}

impl<F> GetterFunc<F>
where
    F: Fn(&str) -> Result<Vec<u8>, CacheError> + Send + Sync + 'static,
{
    /// Wraps the given function into a getter.
    pub fn new(func: F) -> Arc<Self> {
        Arc::new(GetterFunc { func })
    }
}

#[async_trait::async_trait]
impl<F> Getter for GetterFunc<F>
where
    F: Fn(&str) -> Result<Vec<u8>, CacheError> + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        (self.func)(key)
    }
}

/// Counts what happened within a group.
#[derive(Default)]
pub struct GroupStats {
    gets: AtomicU64,
    cache_hits: AtomicU64,
    loads: AtomicU64,
    peer_loads: AtomicU64,
    peer_errors: AtomicU64,
    local_loads: AtomicU64,
    local_load_errors: AtomicU64,
}

impl GroupStats {
    fn increment(counter: &AtomicU64) {
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of lookups (including invalid ones).
    pub fn gets(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    /// Returns the number of lookups which were served by the local cache.
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Returns the number of loads which were actually executed (after collapsing concurrent
    /// requests for the same key).
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Returns the number of values successfully fetched from peers.
    pub fn peer_loads(&self) -> u64 {
        self.peer_loads.load(Ordering::Relaxed)
    }

    /// Returns the number of failed peer fetches (each of them fell back to the local getter).
    pub fn peer_errors(&self) -> u64 {
        self.peer_errors.load(Ordering::Relaxed)
    }

    /// Returns the number of successful invocations of the backing getter.
    pub fn local_loads(&self) -> u64 {
        self.local_loads.load(Ordering::Relaxed)
    }

    /// Returns the number of failed invocations of the backing getter.
    pub fn local_load_errors(&self) -> u64 {
        self.local_load_errors.load(Ordering::Relaxed)
    }
}

impl Display for GroupStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "gets: {}, hits: {}, loads: {}, peer loads: {}, peer errors: {}, local loads: {}, local errors: {}",
            self.gets(),
            self.cache_hits(),
            self.loads(),
            self.peer_loads(),
            self.peer_errors(),
            self.local_loads(),
            self.local_load_errors()
        )
    }
}

/// Represents a named cache namespace.
pub struct Group {
    name: String,
    getter: Arc<dyn Getter>,
    cache: Arc<Cache>,
    peers: OnceLock<Arc<dyn PeerPicker>>,
    flight: SingleFlight<ByteView>,
    stats: Arc<GroupStats>,
}

/// Contains everything needed to perform a load outside of the group itself.
///
/// As a load is executed on its own task, it has to own its dependencies.
struct Loader {
    name: String,
    getter: Arc<dyn Getter>,
    cache: Arc<Cache>,
    peers: Option<Arc<dyn PeerPicker>>,
    stats: Arc<GroupStats>,
}

impl Group {
    /// Creates a new group. Most probably [Groups::new_group] should be used instead, so that the
    /// group can also be served to other peers.
    pub fn new(name: &str, max_memory: usize, getter: Arc<dyn Getter>) -> Self {
        Group {
            name: name.to_owned(),
            getter,
            cache: Arc::new(Cache::new(max_memory)),
            peers: OnceLock::new(),
            flight: SingleFlight::new(),
            stats: Arc::new(GroupStats::default()),
        }
    }

    /// Returns the name of this group.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Provides access to the statistics of this group.
    pub fn stats(&self) -> &GroupStats {
        &self.stats
    }

    /// Provides access to the local cache of this group.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Installs the picker used to determine the owner of a key.
    ///
    /// # Panics
    /// Panics if a picker has already been registered for this group.
    pub fn register_peers(&self, peers: Arc<dyn PeerPicker>) {
        if self.peers.set(peers).is_err() {
            panic!("register_peers called more than once for group {}", self.name);
        }
    }

    /// Returns the value for the given key.
    ///
    /// An empty key is rejected without performing any lookup. If the value isn't cached
    /// locally, it is fetched from the owning peer or loaded via the backing getter.
    pub async fn get(&self, key: &str) -> Result<ByteView, CacheError> {
        GroupStats::increment(&self.stats.gets);

        if key.is_empty() {
            return Err(CacheError::Validation("key is required".to_owned()));
        }

        if let Some(value) = self.cache.get(key) {
            log::debug!("Cache hit for {} in {}", key, self.name);
            GroupStats::increment(&self.stats.cache_hits);
            return Ok(value);
        }

        self.load(key).await
    }

    async fn load(&self, key: &str) -> Result<ByteView, CacheError> {
        let loader = Loader {
            name: self.name.clone(),
            getter: self.getter.clone(),
            cache: self.cache.clone(),
            peers: self.peers.get().cloned(),
            stats: self.stats.clone(),
        };
        let owned_key = key.to_owned();

        self.flight
            .work(key, async move { loader.load(&owned_key).await })
            .await
    }
}

impl Loader {
    async fn load(&self, key: &str) -> Result<ByteView, CacheError> {
        GroupStats::increment(&self.stats.loads);

        if let Some(peer) = self.peers.as_ref().and_then(|peers| peers.pick_peer(key)) {
            match self.get_from_peer(peer.as_ref(), key).await {
                Ok(value) => {
                    GroupStats::increment(&self.stats.peer_loads);
                    return Ok(value);
                }
                Err(error) => {
                    GroupStats::increment(&self.stats.peer_errors);
                    log::warn!(
                        "Failed to fetch {} of {} from peer {}: {}. Loading locally...",
                        key,
                        self.name,
                        peer.address(),
                        error
                    );
                }
            }
        }

        self.get_locally(key).await
    }

    async fn get_from_peer(
        &self,
        peer: &dyn PeerGetter,
        key: &str,
    ) -> Result<ByteView, CacheError> {
        let response = peer
            .get(&FetchRequest {
                group: self.name.clone(),
                key: key.to_owned(),
            })
            .await?;

        Ok(ByteView::new(response.value))
    }

    async fn get_locally(&self, key: &str) -> Result<ByteView, CacheError> {
        match self.getter.get(key).await {
            Ok(bytes) => {
                GroupStats::increment(&self.stats.local_loads);
                let value = ByteView::new(bytes);
                self.cache.add(key, value.clone());
                Ok(value)
            }
            Err(error) => {
                GroupStats::increment(&self.stats.local_load_errors);
                Err(error)
            }
        }
    }
}

/// Keeps track of all groups known to this node.
///
/// This registry is installed in the [Platform](crate::platform::Platform) by the
/// [Builder](crate::builder::Builder) and consulted when serving requests of other peers.
#[derive(Default)]
pub struct Groups {
    groups: RwLock<HashMap<String, Arc<Group>>>,
}

impl Groups {
    /// Creates a new and empty registry.
    pub fn new() -> Self {
        Groups {
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Creates and registers a new group.
    ///
    /// If a group with the same name already exists, it is replaced.
    pub fn new_group(&self, name: &str, max_memory: usize, getter: Arc<dyn Getter>) -> Arc<Group> {
        let group = Arc::new(Group::new(name, max_memory, getter));

        log::info!(
            "Creating group {} with a capacity of {}...",
            name,
            format_size(max_memory)
        );
        if self
            .groups
            .write()
            .unwrap()
            .insert(name.to_owned(), group.clone())
            .is_some()
        {
            log::info!("Group {} has been replaced.", name);
        }

        group
    }

    /// Returns the group with the given name or **None** if no such group exists.
    pub fn find(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.read().unwrap().get(name).cloned()
    }

    /// Returns the names of all known groups.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.read().unwrap().keys().cloned().collect();
        names.sort();

        names
    }
}

#[cfg(test)]
mod tests {
    use crate::byteview::ByteView;
    use crate::error::CacheError;
    use crate::group::{Getter, GetterFunc, Group, Groups};
    use crate::peers::{PeerGetter, PeerPicker};
    use crate::protocol::{FetchRequest, FetchResponse};
    use crate::testing::test_async;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Simulates a slow database which counts how often each key was requested.
    struct SlowDb {
        data: HashMap<String, String>,
        load_counts: Mutex<HashMap<String, usize>>,
        delay: Duration,
    }

    impl SlowDb {
        fn new(delay: Duration) -> Arc<Self> {
            let mut data = HashMap::new();
            let _ = data.insert("Tom".to_owned(), "630".to_owned());
            let _ = data.insert("Jack".to_owned(), "589".to_owned());
            let _ = data.insert("Sam".to_owned(), "567".to_owned());

            Arc::new(SlowDb {
                data,
                load_counts: Mutex::new(HashMap::new()),
                delay,
            })
        }

        fn load_count(&self, key: &str) -> usize {
            *self.load_counts.lock().unwrap().get(key).unwrap_or(&0)
        }
    }

    #[async_trait::async_trait]
    impl Getter for SlowDb {
        async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
            *self
                .load_counts
                .lock()
                .unwrap()
                .entry(key.to_owned())
                .or_insert(0) += 1;
            tokio::time::sleep(self.delay).await;

            self.data
                .get(key)
                .map(|value| value.as_bytes().to_vec())
                .ok_or_else(|| CacheError::not_found(key))
        }
    }

    /// Pretends to be a remote peer which either delivers a fixed value or fails.
    struct FakePeer {
        value: Option<&'static str>,
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl PeerGetter for FakePeer {
        async fn get(&self, request: &FetchRequest) -> Result<FetchResponse, CacheError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.group, "scores");
            tokio::time::sleep(self.delay).await;
            match self.value {
                Some(value) => Ok(FetchResponse {
                    value: value.as_bytes().to_vec(),
                }),
                None => Err(CacheError::Transport("server returned: 503".to_owned())),
            }
        }

        fn address(&self) -> &str {
            "http://fake:9999"
        }
    }

    /// Routes every key to the given peer.
    struct FixedPicker {
        peer: Arc<FakePeer>,
    }

    impl PeerPicker for FixedPicker {
        fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerGetter>> {
            Some(self.peer.clone())
        }
    }

    /// Never names a remote owner, just as a pool would for keys owned by this node.
    struct SelfPicker;

    impl PeerPicker for SelfPicker {
        fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerGetter>> {
            None
        }
    }

    #[test]
    fn values_are_loaded_once_and_then_cached() {
        test_async(async {
            let db = SlowDb::new(Duration::from_millis(0));
            let group = Group::new("scores", 2 << 10, db.clone());

            for (key, expected) in [("Tom", "630"), ("Jack", "589"), ("Sam", "567")] {
                assert_eq!(group.get(key).await.unwrap().to_string(), expected);
                assert_eq!(db.load_count(key), 1);
                assert_eq!(group.get(key).await.unwrap().to_string(), expected);
                assert_eq!(db.load_count(key), 1);
            }

            assert_eq!(group.stats().gets(), 6);
            assert_eq!(group.stats().cache_hits(), 3);
            assert_eq!(group.stats().local_loads(), 3);
        });
    }

    #[test]
    fn unknown_keys_are_reported_and_retried() {
        test_async(async {
            let db = SlowDb::new(Duration::from_millis(0));
            let group = Group::new("scores", 2 << 10, db.clone());

            let result = group.get("Absent").await;
            assert_eq!(matches!(result, Err(CacheError::NotFound(_))), true);
            assert_eq!(db.load_count("Absent"), 1);

            // Failures are not cached, so the getter is asked again...
            assert_eq!(group.get("Absent").await.is_err(), true);
            assert_eq!(db.load_count("Absent"), 2);
            assert_eq!(group.cache().is_empty(), true);
            assert_eq!(group.stats().local_load_errors(), 2);
        });
    }

    #[test]
    fn empty_keys_are_rejected() {
        test_async(async {
            let db = SlowDb::new(Duration::from_millis(0));
            let group = Group::new("scores", 2 << 10, db.clone());

            let result = group.get("").await;
            assert_eq!(result.unwrap_err().is_validation(), true);
            assert_eq!(db.load_count(""), 0);
            assert_eq!(group.stats().loads(), 0);
        });
    }

    #[test]
    fn concurrent_misses_invoke_the_getter_once() {
        test_async(async {
            let db = SlowDb::new(Duration::from_millis(100));
            let group = Arc::new(Group::new("scores", 2 << 10, db.clone()));

            let mut handles = Vec::new();
            for _ in 0..20 {
                let group = group.clone();
                handles.push(tokio::spawn(async move { group.get("Tom").await }));
            }

            for handle in handles {
                assert_eq!(handle.await.unwrap().unwrap(), ByteView::from("630"));
            }
            assert_eq!(db.load_count("Tom"), 1);
            assert_eq!(group.stats().loads(), 1);
        });
    }

    #[test]
    fn concurrent_misses_share_errors() {
        test_async(async {
            let db = SlowDb::new(Duration::from_millis(100));
            let group = Arc::new(Group::new("scores", 2 << 10, db.clone()));

            let mut handles = Vec::new();
            for _ in 0..5 {
                let group = group.clone();
                handles.push(tokio::spawn(async move { group.get("Absent").await }));
            }

            for handle in handles {
                let error = handle.await.unwrap().unwrap_err();
                assert_eq!(error.to_string(), "Not found: key Absent not found");
            }
            assert_eq!(db.load_count("Absent"), 1);
        });
    }

    #[test]
    fn concurrent_misses_fetch_from_the_peer_once() {
        test_async(async {
            let db = SlowDb::new(Duration::from_millis(0));
            let group = Arc::new(Group::new("scores", 2 << 10, db.clone()));
            let peer = Arc::new(FakePeer {
                value: Some("remote"),
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(100),
            });
            group.register_peers(Arc::new(FixedPicker { peer: peer.clone() }));

            let mut handles = Vec::new();
            for _ in 0..20 {
                let group = group.clone();
                handles.push(tokio::spawn(async move { group.get("Tom").await }));
            }

            for handle in handles {
                assert_eq!(handle.await.unwrap().unwrap(), ByteView::from("remote"));
            }
            assert_eq!(peer.calls.load(Ordering::SeqCst), 1);
            assert_eq!(db.load_count("Tom"), 0);
            assert_eq!(group.stats().peer_loads(), 1);
        });
    }

    #[test]
    fn values_are_fetched_from_the_owning_peer() {
        test_async(async {
            let db = SlowDb::new(Duration::from_millis(0));
            let group = Group::new("scores", 2 << 10, db.clone());
            let peer = Arc::new(FakePeer {
                value: Some("remote"),
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(0),
            });
            group.register_peers(Arc::new(FixedPicker { peer: peer.clone() }));

            assert_eq!(group.get("Tom").await.unwrap().to_string(), "remote");
            assert_eq!(peer.calls.load(Ordering::SeqCst), 1);
            assert_eq!(db.load_count("Tom"), 0);
            assert_eq!(group.stats().peer_loads(), 1);
        });
    }

    #[test]
    fn failing_peers_fall_back_to_the_local_getter() {
        test_async(async {
            let db = SlowDb::new(Duration::from_millis(0));
            let group = Group::new("scores", 2 << 10, db.clone());
            let peer = Arc::new(FakePeer {
                value: None,
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(0),
            });
            group.register_peers(Arc::new(FixedPicker { peer: peer.clone() }));

            assert_eq!(group.get("Tom").await.unwrap().to_string(), "630");
            assert_eq!(peer.calls.load(Ordering::SeqCst), 1);
            assert_eq!(db.load_count("Tom"), 1);
            assert_eq!(group.stats().peer_errors(), 1);

            // If both the peer and the local getter fail, the local error is reported...
            let result = group.get("Absent").await;
            assert_eq!(matches!(result, Err(CacheError::NotFound(_))), true);
            assert_eq!(peer.calls.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn keys_owned_by_this_node_are_loaded_locally() {
        test_async(async {
            let db = SlowDb::new(Duration::from_millis(0));
            let group = Group::new("scores", 2 << 10, db.clone());
            group.register_peers(Arc::new(SelfPicker));

            assert_eq!(group.get("Jack").await.unwrap().to_string(), "589");
            assert_eq!(db.load_count("Jack"), 1);
            assert_eq!(group.cache().len(), 1);
        });
    }

    #[test]
    #[should_panic]
    fn registering_peers_twice_panics() {
        let group = Group::new(
            "scores",
            0,
            GetterFunc::new(|key: &str| Err(CacheError::not_found(key))),
        );
        group.register_peers(Arc::new(SelfPicker));
        group.register_peers(Arc::new(SelfPicker));
    }

    #[test]
    fn groups_can_be_registered_and_replaced() {
        let groups = Groups::new();
        assert_eq!(groups.find("scores").is_none(), true);

        let first = groups.new_group(
            "scores",
            0,
            GetterFunc::new(|_: &str| Ok(b"first".to_vec())),
        );
        assert_eq!(Arc::ptr_eq(&groups.find("scores").unwrap(), &first), true);

        let second = groups.new_group(
            "scores",
            0,
            GetterFunc::new(|_: &str| Ok(b"second".to_vec())),
        );
        assert_eq!(Arc::ptr_eq(&groups.find("scores").unwrap(), &second), true);

        let _ = groups.new_group(
            "names",
            0,
            GetterFunc::new(|_: &str| Ok(Vec::new())),
        );
        assert_eq!(groups.names(), vec!["names".to_owned(), "scores".to_owned()]);
    }
}
