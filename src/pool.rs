//! Provides the HTTP based peer pool which connects the nodes of a cache cluster.
//!
//! The pool plays two roles. As [PeerPicker] it places all known nodes on a consistent hash
//! ring and determines which node owns a key. For each remote node it keeps an [HttpGetter]
//! which fetches values via `GET {base_path}{group}/{key}`. As a server side handler,
//! [PeerPool::serve] answers exactly these requests for the groups of the local node.
//!
//! Note that the set of peers is always replaced as a whole via [PeerPool::set]. If the pool is
//! installed via [PeerPool::install], it is configured by the **peers** section of the
//! config and re-configured whenever the config changes:
//! ```yaml
//! peers:
//!     self: "http://10.0.0.1:9999"
//!     nodes:
//!         - "http://10.0.0.1:9999"
//!         - "http://10.0.0.2:9999"
//!     base_path: "/_fcache/"
//!     replicas: 50
//!     # Optional, by default requests to peers never time out.
//!     timeout: 2s
//! ```
//!
//! # Examples
//! ```
//! # use fcache::pool::PeerPool;
//! # use fcache::peers::{PeerGetter, PeerPicker};
//! let pool = PeerPool::new("http://10.0.0.1:9999");
//! pool.set(&["http://10.0.0.1:9999", "http://10.0.0.2:9999"]);
//!
//! // Keys are either owned by this node (None) or by the other one...
//! let owner = pool.pick_peer("Tom").map(|peer| peer.address().to_owned());
//! assert_eq!(owner.is_none() || owner.unwrap() == "http://10.0.0.2:9999/_fcache/", true);
//! ```
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hyper::client::HttpConnector;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Client, Request, Response, StatusCode, Uri};
use tokio::sync::broadcast::error::RecvError;

use crate::config::{Config, Handle};
use crate::consistent_hash::{HashFn, HashRing};
use crate::error::CacheError;
use crate::fmt::parse_duration;
use crate::group::Groups;
use crate::peers::{PeerGetter, PeerPicker};
use crate::platform::Platform;
use crate::protocol::{Codec, FetchRequest, FetchResponse, ProtobufCodec};

/// Contains the path prefix under which the peer protocol is served if nothing else is configured.
pub const DEFAULT_BASE_PATH: &str = "/_fcache/";

/// Contains the number of virtual nodes per peer if nothing else is configured.
pub const DEFAULT_REPLICAS: usize = 50;

/// Specifies how often the config listener checks if the platform is still running.
const CONFIG_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Fetches values from a single remote node via HTTP.
pub struct HttpGetter {
    base_url: String,
    client: Client<HttpConnector>,
    codec: Arc<dyn Codec>,
    timeout: Option<Duration>,
}

impl HttpGetter {
    /// Creates a getter which sends its requests to the given base url (node address plus base
    /// path).
    pub fn new(
        base_url: &str,
        client: Client<HttpConnector>,
        codec: Arc<dyn Codec>,
        timeout: Option<Duration>,
    ) -> Self {
        HttpGetter {
            base_url: base_url.to_owned(),
            client,
            codec,
            timeout,
        }
    }

    /// Computes the url used to fetch the given key of the given group.
    ///
    /// # Examples
    /// ```
    /// # use std::sync::Arc;
    /// # use fcache::pool::HttpGetter;
    /// # use fcache::protocol::ProtobufCodec;
    /// let getter = HttpGetter::new(
    ///     "http://10.0.0.2:9999/_fcache/",
    ///     hyper::Client::new(),
    ///     Arc::new(ProtobufCodec),
    ///     None,
    /// );
    /// assert_eq!(
    ///     getter.url_for("scores", "Tom Sawyer"),
    ///     "http://10.0.0.2:9999/_fcache/scores/Tom%20Sawyer"
    /// );
    /// ```
    pub fn url_for(&self, group: &str, key: &str) -> String {
        format!(
            "{}{}/{}",
            self.base_url,
            urlencoding::encode(group),
            urlencoding::encode(key)
        )
    }

    async fn fetch(&self, uri: Uri) -> Result<FetchResponse, CacheError> {
        let response = self
            .client
            .get(uri)
            .await
            .map_err(|error| CacheError::Transport(error.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(CacheError::Transport(format!(
                "server returned: {}",
                response.status()
            )));
        }

        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|error| {
                CacheError::Transport(format!("reading response body: {}", error))
            })?;

        self.codec.decode(&body).map_err(|error| {
            CacheError::Transport(format!("decoding response body: {}", error))
        })
    }
}

#[async_trait::async_trait]
impl PeerGetter for HttpGetter {
    async fn get(&self, request: &FetchRequest) -> Result<FetchResponse, CacheError> {
        let url = self.url_for(&request.group, &request.key);
        let uri = url.parse::<Uri>().map_err(|error| {
            CacheError::Transport(format!("invalid peer url {}: {}", url, error))
        })?;

        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.fetch(uri))
                .await
                .unwrap_or_else(|_| {
                    Err(CacheError::Transport(format!(
                        "{} didn't respond within {:?}",
                        url, timeout
                    )))
                }),
            None => self.fetch(uri).await,
        }
    }

    fn address(&self) -> &str {
        &self.base_url
    }
}

/// Contains the current set of peers along with the settings used to build it.
struct PeerSet {
    self_address: String,
    base_path: String,
    replicas: usize,
    hash: Option<HashFn>,
    timeout: Option<Duration>,
    ring: HashRing,
    getters: HashMap<String, Arc<HttpGetter>>,
}

/// Keeps track of all nodes of the cluster and serves the peer protocol for the local node.
pub struct PeerPool {
    peers: Mutex<PeerSet>,
    codec: Arc<dyn Codec>,
    client: Client<HttpConnector>,
}

impl PeerPool {
    /// Creates a new pool for the node reachable via the given address (e.g.
    /// `http://10.0.0.1:9999`).
    ///
    /// The pool has no peers until [set](PeerPool::set) is called.
    pub fn new(self_address: &str) -> Self {
        PeerPool {
            peers: Mutex::new(PeerSet {
                self_address: self_address.to_owned(),
                base_path: DEFAULT_BASE_PATH.to_owned(),
                replicas: DEFAULT_REPLICAS,
                hash: None,
                timeout: None,
                ring: HashRing::new(DEFAULT_REPLICAS, None),
                getters: HashMap::new(),
            }),
            codec: Arc::new(ProtobufCodec),
            client: Client::new(),
        }
    }

    /// Specifies the path prefix under which the peer protocol is served.
    pub fn with_base_path(self, base_path: &str) -> Self {
        self.peers.lock().unwrap().base_path = base_path.to_owned();
        self
    }

    /// Specifies the number of virtual nodes per peer.
    pub fn with_replicas(self, replicas: usize) -> Self {
        self.peers.lock().unwrap().replicas = replicas;
        self
    }

    /// Replaces the hash function used by the ring.
    pub fn with_hash(self, hash: HashFn) -> Self {
        self.peers.lock().unwrap().hash = Some(hash);
        self
    }

    /// Limits the time waited for a peer to respond. By default there is no limit.
    pub fn with_timeout(self, timeout: Option<Duration>) -> Self {
        self.peers.lock().unwrap().timeout = timeout;
        self
    }

    /// Replaces the codec used to transfer values.
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Returns the address of the local node.
    pub fn self_address(&self) -> String {
        self.peers.lock().unwrap().self_address.clone()
    }

    /// Returns the path prefix under which the peer protocol is served.
    pub fn base_path(&self) -> String {
        self.peers.lock().unwrap().base_path.clone()
    }

    /// Returns the time waited for a peer to respond or **None** if requests never time out.
    pub fn timeout(&self) -> Option<Duration> {
        self.peers.lock().unwrap().timeout
    }

    /// Replaces the whole set of peers.
    ///
    /// The local node should be part of the given addresses, so that it owns its share of the
    /// keys. This must be called before the pool picks peers or serves requests.
    pub fn set<S: AsRef<str>>(&self, peers: &[S]) {
        let mut set = self.peers.lock().unwrap();
        let (ring, getters) =
            self.build_peers(peers, &set.base_path, set.replicas, set.hash, set.timeout);
        set.ring = ring;
        set.getters = getters;
    }

    fn build_peers<S: AsRef<str>>(
        &self,
        peers: &[S],
        base_path: &str,
        replicas: usize,
        hash: Option<HashFn>,
        timeout: Option<Duration>,
    ) -> (HashRing, HashMap<String, Arc<HttpGetter>>) {
        let mut ring = HashRing::new(replicas, hash);
        ring.add(peers);

        let mut getters = HashMap::with_capacity(peers.len());
        for peer in peers {
            let peer = peer.as_ref();
            let getter = HttpGetter::new(
                &format!("{}{}", peer, base_path),
                self.client.clone(),
                self.codec.clone(),
                timeout,
            );
            let _ = getters.insert(peer.to_owned(), Arc::new(getter));
        }

        (ring, getters)
    }

    /// Answers a request of another peer.
    ///
    /// The path of the request has to look like `{base_path}{group}/{key}` where both, the group
    /// and the key are percent-encoded.
    ///
    /// # Panics
    /// Panics if the path doesn't start with the base path of this pool. Routing such requests
    /// here is a programming error of the caller.
    pub async fn serve(&self, groups: &Groups, request: Request<Body>) -> Response<Body> {
        let base_path = self.base_path();
        let path = request.uri().path().to_owned();
        if !path.starts_with(&base_path) {
            panic!("PeerPool asked to serve an unexpected path: {}", path);
        }

        log::debug!("[{}] {} {}", self.self_address(), request.method(), path);

        let parts: Vec<&str> = path[base_path.len()..].splitn(2, '/').collect();
        if parts.len() != 2 {
            return text_response(StatusCode::BAD_REQUEST, "bad request".to_owned());
        }

        let (group_name, key) = match (urlencoding::decode(parts[0]), urlencoding::decode(parts[1]))
        {
            (Ok(group_name), Ok(key)) => (group_name.into_owned(), key.into_owned()),
            _ => return text_response(StatusCode::BAD_REQUEST, "bad request".to_owned()),
        };

        let group = match groups.find(&group_name) {
            Some(group) => group,
            None => {
                return text_response(
                    StatusCode::NOT_FOUND,
                    format!("no such group: {}", group_name),
                )
            }
        };

        match group.get(&key).await {
            Ok(value) => match self.codec.encode(&FetchResponse {
                value: value.byte_slice(),
            }) {
                Ok(body) => {
                    let mut response = Response::new(Body::from(body));
                    let _ = response.headers_mut().insert(
                        CONTENT_TYPE,
                        HeaderValue::from_static("application/octet-stream"),
                    );
                    response
                }
                Err(error) => text_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
            },
            Err(error) if error.is_validation() => {
                text_response(StatusCode::BAD_REQUEST, error.to_string())
            }
            Err(error) => text_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
        }
    }

    /// Creates and installs a **PeerPool** into the given **Platform**.
    ///
    /// The pool is configured by the **peers** section of the config (if present) and
    /// re-configured whenever the config changes. Note that this is called by the
    /// [Builder](crate::builder::Builder) unless disabled.
    pub fn install(platform: &Arc<Platform>) -> Arc<Self> {
        let pool = Arc::new(PeerPool::new(""));

        if let Some(config) = platform.find::<Config>() {
            pool.apply_config(&config.current());
            PeerPool::listen_for_config_changes(platform.clone(), pool.clone(), config);
        }

        platform.register::<PeerPool>(pool.clone());

        pool
    }

    fn listen_for_config_changes(platform: Arc<Platform>, pool: Arc<PeerPool>, config: Arc<Config>) {
        let mut notifier = config.notifier();
        crate::spawn!(async move {
            while platform.is_running() {
                match tokio::time::timeout(CONFIG_WAIT_TIMEOUT, notifier.recv()).await {
                    Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => {
                        pool.apply_config(&config.current())
                    }
                    Ok(Err(RecvError::Closed)) => return,
                    Err(_) => (),
                }
            }
        });
    }

    /// Applies the **peers** section of the given config.
    ///
    /// Missing settings fall back to their defaults. The set of peers is replaced as a whole,
    /// together with the address of the local node.
    pub fn apply_config(&self, handle: &Handle) {
        let nodes: Vec<String> = handle
            .query("peers.nodes")
            .as_vec()
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(|node| node.as_str().map(|node| node.to_owned()))
                    .collect()
            })
            .unwrap_or_default();

        let timeout = match handle.query_scalar("peers.timeout") {
            Some(timeout) => match parse_duration(timeout) {
                Ok(timeout) => Some(timeout),
                Err(error) => {
                    log::warn!("Ignoring invalid peers.timeout: {}", error);
                    None
                }
            },
            None => {
                let setting = handle.query("peers.timeout");
                if !setting.is_badvalue() && !setting.is_null() {
                    log::warn!("Ignoring peers.timeout as it is neither a string nor a number.");
                }
                None
            }
        };

        let self_address = handle
            .query("peers.self")
            .as_str()
            .unwrap_or("")
            .to_owned();
        let base_path = handle
            .query("peers.base_path")
            .as_str()
            .unwrap_or(DEFAULT_BASE_PATH)
            .to_owned();
        let replicas = handle
            .query("peers.replicas")
            .as_i64()
            .filter(|replicas| *replicas > 0)
            .map(|replicas| replicas as usize)
            .unwrap_or(DEFAULT_REPLICAS);

        let hash = self.peers.lock().unwrap().hash;
        let (ring, getters) = self.build_peers(&nodes, &base_path, replicas, hash, timeout);

        {
            let mut set = self.peers.lock().unwrap();
            set.self_address = self_address;
            set.base_path = base_path;
            set.replicas = replicas;
            set.timeout = timeout;
            set.ring = ring;
            set.getters = getters;
        }

        log::info!(
            "Peer pool of {} now contains {} node(s)...",
            self.self_address(),
            nodes.len()
        );
    }
}

impl PeerPicker for PeerPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let set = self.peers.lock().unwrap();
        let owner = set.ring.get(key);
        if owner.is_empty() || owner == set.self_address {
            return None;
        }

        log::debug!("Picked peer {} for {}", owner, key);
        set.getters
            .get(owner)
            .map(|getter| getter.clone() as Arc<dyn PeerGetter>)
    }
}

fn text_response(status: StatusCode, message: String) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    let _ = response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );

    response
}
