//! Contains the HTTP server which answers the requests of other peers.
//!
//! Opens a server socket on the specified port (**server.port** in the config or 9999 as
//! fallback) and binds it to the selected IP (**server.host** in the config or 0.0.0.0 as
//! fallback). Each connection is handled by its own task using **hyper**. Requests below the
//! base path of the [PeerPool](crate::pool::PeerPool) are answered by
//! [PeerPool::serve](crate::pool::PeerPool::serve), everything else yields a 404.
//!
//! The server periodically tries to bind the socket until this succeeds. Therefore a new instance
//! can be started while the old one bleeds out and the port is "handed through" with minimal
//! downtime. Also, this listens to change events of the config and relocates to another port or
//! host if changed.
//!
//! # Example
//!
//! ```no_run
//! use fcache::builder::Builder;
//! use fcache::config::Config;
//! use fcache::server::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     platform.require::<Config>().load_from_string("
//!         server:
//!             port: 1503
//!     ", None);
//!
//!     platform.require::<Server>().event_loop().await;
//! }
//! ```
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::{Body, Request, Response, StatusCode};
use tokio::net::{TcpListener, TcpStream};

use crate::config::Config;
use crate::group::Groups;
use crate::platform::Platform;
use crate::pool::PeerPool;
use crate::spawn;

/// Specifies how often a connection checks if the platform is still running.
const READ_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Specifies the timeout when waiting for a new incoming connection.
///
/// When waiting for a new connection we need to interrupt this every once in a while so that
/// we can check if the platform has been shut down.
const CONNECT_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Specifies the interval in which binding the server socket is retried.
const BIND_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Represents the server which accepts the connections of other peers.
pub struct Server {
    running: AtomicBool,
    current_address: Mutex<Option<String>>,
    platform: Arc<Platform>,
    connections: AtomicUsize,
}

impl Server {
    /// Creates and installs a **Server** into the given **Platform**.
    ///
    /// Note that this is called by the [Builder](crate::builder::Builder) unless disabled.
    ///
    /// Also note, that this will not technically start the server. This has to be done manually
    /// via [event_loop](Server::event_loop) as it is most probably done in the main thread.
    pub fn install(platform: &Arc<Platform>) -> Arc<Self> {
        let server = Arc::new(Server {
            running: AtomicBool::new(false),
            current_address: Mutex::new(None),
            platform: platform.clone(),
            connections: AtomicUsize::new(0),
        });

        platform.register::<Server>(server.clone());

        server
    }

    /// Returns the number of currently open connections.
    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    /// Returns the address the server socket is currently bound to.
    pub fn current_address(&self) -> Option<String> {
        self.current_address.lock().unwrap().clone()
    }

    /// Determines if the server socket should keep listening for incoming connections.
    ///
    /// This is toggled to false if the configured address changed, so that **server_loop**
    /// exits and the **event_loop** binds a new socket.
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Determines the server address based on the current configuration.
    fn address(&self) -> String {
        self.platform
            .find::<Config>()
            .map(|config| {
                let handle = config.current();
                format!(
                    "{}:{}",
                    handle.query("server.host").as_str().unwrap_or("0.0.0.0"),
                    handle
                        .query("server.port")
                        .as_i64()
                        .filter(|port| port > &0 && port <= &(u16::MAX as i64))
                        .unwrap_or(9999)
                )
            })
            .unwrap_or_else(|| "0.0.0.0:9999".to_owned())
    }

    /// Starts the event loop in a separate task.
    ///
    /// This is most probably used by test scenarios where the tests itself run in the main thread.
    pub fn fork(server: &Arc<Server>) {
        let cloned_server = server.clone();
        spawn!(async move {
            cloned_server.event_loop().await;
        });
    }

    /// Starts the event loop in a separate task and waits until the server socket is bound.
    ///
    /// Just like **fork** this is intended to be used in test environments.
    pub async fn fork_and_await(server: &Arc<Server>) {
        Server::fork(server);

        while server.current_address().is_none() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Tries to open a server socket on the configured address and then serves incoming
    /// connections.
    ///
    /// Returns once the platform is terminated. If the configured address changes, the socket
    /// is closed and re-opened on the new address.
    pub async fn event_loop(&self) {
        let mut address = String::new();
        let mut last_bind_error_reported: Option<Instant> = None;

        while self.platform.is_running() {
            if !self.is_running() {
                address = self.address();
                self.running.store(true, Ordering::Release);
            }

            match TcpListener::bind(&address).await {
                Ok(listener) => {
                    log::info!("Opened server socket on {}...", &address);
                    *self.current_address.lock().unwrap() = Some(address.clone());
                    self.server_loop(&listener).await;
                    *self.current_address.lock().unwrap() = None;
                    log::info!("Closing server socket on {}.", &address);
                }
                Err(error) => {
                    // We retry every 500ms but only complain every 5s...
                    if last_bind_error_reported
                        .map(|reported| reported.elapsed().as_secs() >= 5)
                        .unwrap_or(true)
                    {
                        log::error!(
                            "Cannot open server address {}: {}. Retrying every 500ms...",
                            &address,
                            error
                        );
                        last_bind_error_reported = Some(Instant::now());
                    }
                    tokio::time::sleep(BIND_RETRY_INTERVAL).await;
                }
            }
        }
    }

    /// Accepts incoming connections until either the platform is terminated or the configured
    /// address changes.
    async fn server_loop(&self, listener: &TcpListener) {
        let mut config_changed_flag = self
            .platform
            .find::<Config>()
            .map(|config| config.notifier());

        while self.platform.is_running() && self.is_running() {
            tokio::select! {
                timeout_stream = tokio::time::timeout(CONNECT_WAIT_TIMEOUT, listener.accept()) => {
                    match timeout_stream {
                        Ok(Ok((stream, _))) => self.handle_new_connection(stream),
                        Ok(Err(error)) => {
                            log::error!("Failed to accept a connection: {}", error);
                            return;
                        }
                        // The timeout elapsed, so we only re-check the loop condition...
                        Err(_) => (),
                    }
                }
                _ = config_changed(&mut config_changed_flag) => {
                    let new_address = self.address();
                    if self.current_address().as_ref() != Some(&new_address) {
                        log::info!("Server address has changed. Restarting server socket...");
                        self.running.store(false, Ordering::Release);
                        return;
                    }
                }
            }
        }
    }

    /// Serves a new connection in its own task.
    fn handle_new_connection(&self, stream: TcpStream) {
        let platform = self.platform.clone();
        let _ = stream.set_nodelay(true);
        let peer_address = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "<unknown>".to_owned());

        let _ = self.connections.fetch_add(1, Ordering::AcqRel);
        spawn!(async move {
            log::debug!("Opened connection from {}...", peer_address);
            serve_connection(platform.clone(), stream, &peer_address).await;
            log::debug!("Closed connection to {}.", peer_address);

            if let Some(server) = platform.find::<Server>() {
                let _ = server.connections.fetch_sub(1, Ordering::AcqRel);
            }
        });
    }
}

/// Waits for the next config change or forever if there is no config.
async fn config_changed(notifier: &mut Option<crate::config::ChangeNotifier>) {
    match notifier {
        Some(notifier) => {
            let _ = notifier.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Runs the HTTP protocol on the given connection until either side closes it.
///
/// Once the platform is terminated, the connection is shut down gracefully so that pending
/// requests are still answered.
async fn serve_connection(platform: Arc<Platform>, stream: TcpStream, peer_address: &str) {
    let service_platform = platform.clone();
    let connection = Http::new().serve_connection(
        stream,
        service_fn(move |request| {
            let platform = service_platform.clone();
            async move { Ok::<_, Infallible>(dispatch(platform, request).await) }
        }),
    );
    tokio::pin!(connection);

    let mut shutting_down = false;
    loop {
        tokio::select! {
            result = &mut connection => {
                if let Err(error) = result {
                    log::debug!("An IO error occurred in connection {}: {}", peer_address, error);
                }
                return;
            }
            _ = tokio::time::sleep(READ_WAIT_TIMEOUT), if !shutting_down => {
                if !platform.is_running() {
                    connection.as_mut().graceful_shutdown();
                    shutting_down = true;
                }
            }
        }
    }
}

/// Routes a request either to the peer pool or answers it with a 404.
async fn dispatch(platform: Arc<Platform>, request: Request<Body>) -> Response<Body> {
    if let (Some(pool), Some(groups)) = (platform.find::<PeerPool>(), platform.find::<Groups>()) {
        if request.uri().path().starts_with(&pool.base_path()) {
            return pool.serve(&groups, request).await;
        }
    }

    log::debug!("Rejecting request for unknown path {}", request.uri().path());
    let mut response = Response::new(Body::from("not found"));
    *response.status_mut() = StatusCode::NOT_FOUND;

    response
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::config::Config;
    use crate::consistent_hash::HashRing;
    use crate::error::CacheError;
    use crate::group::{GetterFunc, Group, Groups};
    use crate::platform::Platform;
    use crate::pool::PeerPool;
    use crate::server::Server;
    use crate::testing::test_async;
    use hyper::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const NODE_A: &str = "http://127.0.0.1:1503";
    const NODE_B: &str = "http://127.0.0.1:1504";
    const DEAD_NODE: &str = "http://127.0.0.1:1505";

    /// Starts a node on the given port which knows both test nodes.
    async fn start_node(
        port: u16,
        self_address: &str,
        name: &'static str,
        loads: Arc<AtomicUsize>,
    ) -> (Arc<Platform>, Arc<Group>) {
        let platform = Builder::new()
            .enable_config()
            .enable_groups()
            .build()
            .await;
        platform
            .require::<Config>()
            .load_from_string(
                &format!(
                    "
server:
    host: 127.0.0.1
    port: {}
peers:
    self: '{}'
    nodes:
        - '{}'
        - '{}'
",
                    port, self_address, NODE_A, NODE_B
                ),
                None,
            )
            .unwrap();

        let pool = PeerPool::install(&platform);
        let server = Server::install(&platform);

        let group = platform.require::<Groups>().new_group(
            "scores",
            2 << 10,
            GetterFunc::new(move |key: &str| {
                let _ = loads.fetch_add(1, Ordering::SeqCst);
                if key.starts_with("Absent") {
                    Err(CacheError::not_found(key))
                } else {
                    Ok(format!("{}@{}", key, name).into_bytes())
                }
            }),
        );
        group.register_peers(pool);

        Server::fork_and_await(&server).await;

        (platform, group)
    }

    /// Finds a key which is owned by the given node within a ring of the given nodes.
    fn key_owned_by(owner: &str, nodes: &[&str], prefix: &str) -> String {
        let mut ring = HashRing::new(crate::pool::DEFAULT_REPLICAS, None);
        ring.add(nodes);

        (0..)
            .map(|i| format!("{}-{}", prefix, i))
            .find(|key| ring.get(key) == owner)
            .unwrap()
    }

    async fn status_of(path: &str) -> StatusCode {
        let uri = format!("{}{}", NODE_A, path).parse().unwrap();
        hyper::Client::new().get(uri).await.unwrap().status()
    }

    #[test]
    fn integration_test() {
        // We want exclusive access to the ports 1503 and 1504...
        log::info!("Acquiring shared resources...");
        let _guard = crate::testing::SHARED_TEST_RESOURCES.lock().unwrap();
        log::info!("Successfully acquired shared resources.");

        test_async(async {
            let loads_a = Arc::new(AtomicUsize::new(0));
            let loads_b = Arc::new(AtomicUsize::new(0));
            let (platform_a, group_a) = start_node(1503, NODE_A, "a", loads_a.clone()).await;
            let (platform_b, group_b) = start_node(1504, NODE_B, "b", loads_b.clone()).await;

            // A key owned by B is fetched from B and loaded there...
            let remote_key = key_owned_by(NODE_B, &[NODE_A, NODE_B], "Tom");
            assert_eq!(
                group_a.get(&remote_key).await.unwrap().to_string(),
                format!("{}@b", remote_key)
            );
            assert_eq!(loads_a.load(Ordering::SeqCst), 0);
            assert_eq!(loads_b.load(Ordering::SeqCst), 1);
            assert_eq!(group_a.stats().peer_loads(), 1);
            assert_eq!(group_b.cache().len(), 1);

            // A key owned by A is loaded locally and cached...
            let local_key = key_owned_by(NODE_A, &[NODE_A, NODE_B], "Jack");
            assert_eq!(
                group_a.get(&local_key).await.unwrap().to_string(),
                format!("{}@a", local_key)
            );
            assert_eq!(group_a.get(&local_key).await.is_ok(), true);
            assert_eq!(loads_a.load(Ordering::SeqCst), 1);

            // A remote failure is reported to the peer and then retried locally...
            let absent_key = key_owned_by(NODE_B, &[NODE_A, NODE_B], "Absent");
            assert_eq!(group_a.get(&absent_key).await.is_err(), true);
            assert_eq!(group_a.stats().peer_errors(), 1);
            assert_eq!(loads_a.load(Ordering::SeqCst), 2);

            // Check the status codes of the peer protocol...
            assert_eq!(status_of("/_fcache/scores/Tom").await, StatusCode::OK);
            assert_eq!(status_of("/_fcache/scores").await, StatusCode::BAD_REQUEST);
            assert_eq!(
                status_of("/_fcache/unknown/Tom").await,
                StatusCode::NOT_FOUND
            );
            // A key owned by A fails locally, without asking B...
            let local_absent_key = key_owned_by(NODE_A, &[NODE_A, NODE_B], "Absent");
            assert_eq!(
                status_of(&format!("/_fcache/scores/{}", local_absent_key)).await,
                StatusCode::INTERNAL_SERVER_ERROR
            );
            assert_eq!(status_of("/other/path").await, StatusCode::NOT_FOUND);
            assert_eq!(group_a.stats().peer_errors(), 1);

            // If a peer is down, the value is loaded locally...
            let pool_a = platform_a.require::<PeerPool>();
            pool_a.set(&[NODE_A, DEAD_NODE]);
            let dead_key = key_owned_by(DEAD_NODE, &[NODE_A, DEAD_NODE], "Sam");
            let peer_errors = group_a.stats().peer_errors();
            let local_loads = loads_a.load(Ordering::SeqCst);
            assert_eq!(
                group_a.get(&dead_key).await.unwrap().to_string(),
                format!("{}@a", dead_key)
            );
            assert_eq!(group_a.stats().peer_errors(), peer_errors + 1);
            assert_eq!(loads_a.load(Ordering::SeqCst), local_loads + 1);

            platform_a.terminate();
            platform_b.terminate();
        });
    }
}
