//! Provides a consistent hash ring which maps keys to the peers owning them.
//!
//! Each peer is placed on the ring several times (once per **replica**, also known as virtual
//! node). A key is owned by the first virtual node at or after the hash of the key, wrapping
//! around at the end of the ring. Placing many virtual nodes per peer spreads the keys evenly and
//! ensures that adding or removing a peer only moves the keys which this peer gains or loses.
//!
//! # Examples
//! ```
//! # use fcache::consistent_hash::HashRing;
//! let mut ring = HashRing::new(50, None);
//! assert_eq!(ring.get("Tom"), "");
//!
//! ring.add(&["http://node-a:9999", "http://node-b:9999"]);
//! let owner = ring.get("Tom").to_owned();
//! assert_eq!(ring.get("Tom"), owner);
//! ```
use fnv::FnvHashMap;

/// Computes the 32 bit hash of the given data.
pub type HashFn = fn(&[u8]) -> u32;

/// Computes the IEEE CRC-32 of the given data, which is the default hash of a [HashRing].
///
/// # Examples
/// ```
/// assert_eq!(fcache::consistent_hash::ieee(b"123456789"), 0xCBF43926);
/// ```
pub fn ieee(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Computes the CRC-32C (Castagnoli) of the given data.
///
/// This can be passed to [HashRing::new] or [PeerPool::with_hash](crate::pool::PeerPool::with_hash)
/// as an alternative to the default hash. Note that all nodes of a cluster have to agree on the
/// hash, otherwise they disagree on the owners of the keys.
///
/// # Examples
/// ```
/// assert_eq!(fcache::consistent_hash::castagnoli(b"123456789"), 0xE3069283);
/// ```
pub fn castagnoli(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// Maps keys onto a set of nodes using consistent hashing.
pub struct HashRing {
    hash: HashFn,
    replicas: usize,
    keys: Vec<u32>,
    nodes: FnvHashMap<u32, String>,
}

impl HashRing {
    /// Creates a new and empty ring which places each node **replicas** times.
    ///
    /// If no hash function is given, the IEEE **CRC-32** ([ieee]) is used.
    pub fn new(replicas: usize, hash: Option<HashFn>) -> Self {
        HashRing {
            hash: hash.unwrap_or(ieee),
            replicas,
            keys: Vec::new(),
            nodes: FnvHashMap::default(),
        }
    }

    /// Places the given nodes on the ring.
    ///
    /// The virtual node **i** of a node is positioned at the hash of the concatenation of **i**
    /// and the node name.
    pub fn add<S: AsRef<str>>(&mut self, nodes: &[S]) {
        for node in nodes {
            let node = node.as_ref();
            for replica in 0..self.replicas {
                let hash = (self.hash)(format!("{}{}", replica, node).as_bytes());
                self.keys.push(hash);
                let _ = self.nodes.insert(hash, node.to_owned());
            }
        }

        self.keys.sort_unstable();
    }

    /// Returns the node owning the given key or an empty string if the ring is empty.
    pub fn get(&self, key: &str) -> &str {
        if self.keys.is_empty() {
            return "";
        }

        let hash = (self.hash)(key.as_bytes());
        let index = self.keys.partition_point(|candidate| *candidate < hash);

        self.nodes
            .get(&self.keys[index % self.keys.len()])
            .map(|node| node.as_str())
            .unwrap_or("")
    }

    /// Determines if no node has been placed on the ring yet.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::consistent_hash::{castagnoli, ieee, HashRing};

    /// Uses the numeric value of the data as hash so that positions on the ring are predictable.
    fn numeric_hash(data: &[u8]) -> u32 {
        std::str::from_utf8(data).unwrap().parse().unwrap()
    }

    #[test]
    fn keys_are_mapped_to_the_next_virtual_node() {
        let mut ring = HashRing::new(3, Some(numeric_hash));

        // This yields the virtual nodes 2, 4, 6, 12, 14, 16, 22, 24, 26...
        ring.add(&["6", "4", "2"]);

        assert_eq!(ring.get("2"), "2");
        assert_eq!(ring.get("11"), "2");
        assert_eq!(ring.get("23"), "4");
        // 27 is beyond the last virtual node and wraps around to 2...
        assert_eq!(ring.get("27"), "2");

        // Adding 8, 18, 28 makes the node "8" the owner of 27...
        ring.add(&["8"]);
        assert_eq!(ring.get("2"), "2");
        assert_eq!(ring.get("11"), "2");
        assert_eq!(ring.get("23"), "4");
        assert_eq!(ring.get("27"), "8");
    }

    #[test]
    fn empty_ring_has_no_owners() {
        let ring = HashRing::new(50, None);
        assert_eq!(ring.is_empty(), true);
        assert_eq!(ring.get("Tom"), "");
        assert_eq!(ring.get(""), "");
    }

    #[test]
    fn lookups_are_deterministic() {
        let nodes = ["http://a:9999", "http://b:9999", "http://c:9999"];
        let mut first = HashRing::new(50, None);
        first.add(&nodes);
        let mut second = HashRing::new(50, None);
        second.add(&nodes);

        for i in 0..1000 {
            let key = format!("key-{}", i);
            assert_eq!(first.get(&key), first.get(&key));
            assert_eq!(first.get(&key), second.get(&key));
        }
    }

    #[test]
    fn adding_a_node_only_moves_keys_to_this_node() {
        let mut ring = HashRing::new(50, None);
        ring.add(&["http://a:9999", "http://b:9999", "http://c:9999"]);
        let before: Vec<String> = (0..1000)
            .map(|i| ring.get(&format!("key-{}", i)).to_owned())
            .collect();

        ring.add(&["http://d:9999"]);

        let mut moved = 0;
        for (i, previous_owner) in before.iter().enumerate() {
            let owner = ring.get(&format!("key-{}", i));
            if owner != previous_owner {
                assert_eq!(owner, "http://d:9999");
                moved += 1;
            }
        }

        // The new node should have picked up a fair share of the keys...
        assert!(moved > 0);
        assert!(moved < 1000);
    }

    #[test]
    fn removing_a_node_only_moves_its_own_keys() {
        let mut ring = HashRing::new(50, None);
        ring.add(&["http://a:9999", "http://b:9999", "http://c:9999"]);
        let before: Vec<String> = (0..1000)
            .map(|i| ring.get(&format!("key-{}", i)).to_owned())
            .collect();

        // Rings are never shrunk in place, a new one is built from the remaining nodes...
        let mut shrunk = HashRing::new(50, None);
        shrunk.add(&["http://a:9999", "http://c:9999"]);

        let mut moved = 0;
        for (i, previous_owner) in before.iter().enumerate() {
            let owner = shrunk.get(&format!("key-{}", i));
            if previous_owner == "http://b:9999" {
                assert_ne!(owner, "http://b:9999");
                moved += 1;
            } else {
                assert_eq!(owner, previous_owner);
            }
        }

        assert!(moved > 0);
        assert!(moved < 1000);
    }

    #[test]
    fn the_default_hash_is_ieee_crc32() {
        assert_eq!(ieee(b"Tom"), 1167209971);
        assert_ne!(ieee(b"Tom"), castagnoli(b"Tom"));

        let mut default_ring = HashRing::new(50, None);
        default_ring.add(&["http://a:9999", "http://b:9999", "http://c:9999"]);
        let mut ieee_ring = HashRing::new(50, Some(ieee));
        ieee_ring.add(&["http://a:9999", "http://b:9999", "http://c:9999"]);
        let mut castagnoli_ring = HashRing::new(50, Some(castagnoli));
        castagnoli_ring.add(&["http://a:9999", "http://b:9999", "http://c:9999"]);

        let mut differences = 0;
        for i in 0..1000 {
            let key = format!("key-{}", i);
            assert_eq!(default_ring.get(&key), ieee_ring.get(&key));
            if default_ring.get(&key) != castagnoli_ring.get(&key) {
                differences += 1;
            }
        }
        assert!(differences > 0);
    }
}
