//! Defines the capabilities a group needs to fetch values from other nodes.
//!
//! A [PeerPicker] decides which node owns a key, a [PeerGetter] performs the actual remote
//! fetch. The [PeerPool](crate::pool::PeerPool) implements both sides via HTTP.
use std::sync::Arc;

use crate::error::CacheError;
use crate::protocol::{FetchRequest, FetchResponse};

/// Locates the peer which owns a given key.
pub trait PeerPicker: Send + Sync {
    /// Returns the peer owning the given key.
    ///
    /// Returns **None** if there is no remote owner, which is also the case if this node owns
    /// the key itself.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}

/// Fetches values from a specific peer.
#[async_trait::async_trait]
pub trait PeerGetter: Send + Sync {
    /// Asks the peer for the value requested by the given request.
    async fn get(&self, request: &FetchRequest) -> Result<FetchResponse, CacheError>;

    /// Returns the address of the peer for logging purposes.
    fn address(&self) -> &str;
}
