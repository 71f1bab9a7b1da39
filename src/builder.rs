//! Provides a builder which sets up the components of a cache node.
//!
//! # Example
//! Setting up a node with all features enabled:
//! ```no_run
//! # use fcache::builder::Builder;
//! # use fcache::group::{Groups, GetterFunc};
//! # use fcache::error::CacheError;
//! # use fcache::pool::PeerPool;
//! # use fcache::server::Server;
//! #[tokio::main]
//! async fn main() {
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     // Register the groups served by this node...
//!     let group = platform.require::<Groups>().new_group(
//!         "scores",
//!         2048,
//!         GetterFunc::new(|key: &str| Err(CacheError::not_found(key))),
//!     );
//!     group.register_peers(platform.require::<PeerPool>());
//!
//!     platform.require::<Server>().event_loop().await;
//! }
//! ```
use std::sync::Arc;

use crate::group::Groups;
use crate::platform::Platform;
use crate::pool::PeerPool;
use crate::server::Server;
use crate::{init_logging, FCACHE_REVISION, FCACHE_VERSION};

/// Initializes a node by creating and installing the selected components.
///
/// Note that the peer pool is configured via the config. Therefore it should most probably be
/// combined with [enable_config](Builder::enable_config).
#[derive(Default)]
pub struct Builder {
    setup_logging: bool,
    enable_signals: bool,
    setup_config: bool,
    setup_groups: bool,
    setup_peers: bool,
    setup_server: bool,
}

impl Builder {
    /// Creates a new builder with all components disabled.
    pub fn new() -> Self {
        Builder::default()
    }

    /// Enables all components.
    pub fn enable_all(mut self) -> Self {
        self.setup_logging = true;
        self.enable_signals = true;
        self.setup_config = true;
        self.setup_groups = true;
        self.setup_peers = true;
        self.setup_server = true;

        self
    }

    /// Enables the setup of **simplelog** which logs to stdout.
    pub fn enable_logging(mut self) -> Self {
        self.setup_logging = true;
        self
    }

    /// Disables the setup of the logging system after [enable_all()](Builder::enable_all) has
    /// been used.
    pub fn disable_logging(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Installs a signal listener which terminates the platform once **CTRL-C** or **SIGHUP**
    /// is received.
    ///
    /// For more details see: [signals](crate::signals)
    pub fn enable_signals(mut self) -> Self {
        self.enable_signals = true;
        self
    }

    /// Disables the signal listener after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_signals(mut self) -> Self {
        self.enable_signals = false;
        self
    }

    /// Installs a [Config](crate::config::Config) which loads **config/settings.yml**.
    pub fn enable_config(mut self) -> Self {
        self.setup_config = true;
        self
    }

    /// Disables the config after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_config(mut self) -> Self {
        self.setup_config = false;
        self
    }

    /// Installs an empty [Groups](crate::group::Groups) registry.
    pub fn enable_groups(mut self) -> Self {
        self.setup_groups = true;
        self
    }

    /// Disables the group registry after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_groups(mut self) -> Self {
        self.setup_groups = false;
        self
    }

    /// Installs a [PeerPool](crate::pool::PeerPool) which is configured by the **peers** section
    /// of the config.
    pub fn enable_peers(mut self) -> Self {
        self.setup_peers = true;
        self
    }

    /// Disables the peer pool after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_peers(mut self) -> Self {
        self.setup_peers = false;
        self
    }

    /// Installs a [Server](crate::server::Server) which answers the requests of other peers.
    ///
    /// Note that the event loop still has to be started manually via
    /// `platform.require::<Server>().event_loop().await`.
    pub fn enable_server(mut self) -> Self {
        self.setup_server = true;
        self
    }

    /// Disables the server after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_server(mut self) -> Self {
        self.setup_server = false;
        self
    }

    /// Builds the [Platform](crate::platform::Platform) with all enabled components being
    /// registered.
    pub async fn build(self) -> Arc<Platform> {
        let platform = Platform::new();

        if self.setup_logging {
            init_logging();
        }

        log::info!(
            "||. FCACHE (v {} - rev {}) running on {} core(s) in {} CPU(s)",
            FCACHE_VERSION,
            FCACHE_REVISION,
            num_cpus::get(),
            num_cpus::get_physical()
        );

        if self.enable_signals {
            crate::signals::install(platform.clone());
        }

        if self.setup_config {
            crate::config::install(platform.clone()).await;
        }

        if self.setup_groups {
            platform.register::<Groups>(Arc::new(Groups::new()));
        }

        if self.setup_peers {
            let _ = PeerPool::install(&platform);
        }

        if self.setup_server {
            let _ = Server::install(&platform);
        }

        platform
    }
}
