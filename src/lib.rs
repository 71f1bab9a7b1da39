//! fcache is a distributed read-through cache which shards its keys across a cluster of peers.
//!
//! # Introduction
//! Each node of a cluster serves a set of named [groups](group::Group). A group is backed by a
//! [Getter](group::Getter) which loads values from the actual data source (e.g. a slow database)
//! and keeps the most recently used values in a memory bounded [LRU cache](lru::Cache).
//!
//! The keys are distributed among all nodes using [consistent hashing](consistent_hash). If a
//! node receives a lookup for a key owned by another node, it fetches the value from the owner
//! via HTTP (see [pool]). Therefore each value is only loaded and cached once in the whole
//! cluster. If the owner cannot be reached, the value is loaded locally instead.
//!
//! Concurrent lookups for the same key are collapsed via [singleflight], so that a cold key
//! only hits the data source (or the owning peer) once, no matter how many callers wait for it.
//!
//! # Features
//! * **100% Async/Await** - the whole node builds upon [tokio](https://tokio.rs/) and
//!   [hyper](https://hyper.rs/).
//! * **Reload-aware config facility** which permits to update the set of peers, the base path or
//!   even the port during operation. See [config].
//! * **Pluggable wire format** - values are transferred as protobuf messages by default but the
//!   [Codec](protocol::Codec) can be replaced.
//!
//! # Modules
//! * [byteview]: the immutable unit of cached values.
//! * [lru]: the size constrained LRU store and its thread safe facade.
//! * [consistent_hash]: the ring which maps keys onto nodes.
//! * [singleflight]: collapses concurrent loads of the same key.
//! * [group]: the named cache namespaces and their registry.
//! * [peers] and [pool]: locating and querying the owner of a key.
//! * [server]: answers the requests of other peers.
//!
//! # Examples
//! A short example on how to set up a node can be found here [Builder](builder::Builder). A
//! complete node is provided by **fcache-io**.
#![deny(missing_docs, unused_extern_crates, unused_import_braces)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod builder;
pub mod byteview;
pub mod config;
pub mod consistent_hash;
pub mod error;
pub mod fmt;
pub mod group;
pub mod lru;
pub mod peers;
pub mod platform;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod signals;
pub mod singleflight;

/// Contains the version of the fcache library.
pub const FCACHE_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the fcache build being used.
pub const FCACHE_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// Note that most probably the simplest way is to use a [Builder](builder::Builder) to set up the
/// framework, which will also set up logging if enabled.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // Integration tests might try to initialize the logging system several times...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async lambda within `tokio::spawn`.
///
/// Note that this also applies std::mem::drop on the returned handle to make
/// clippy happy.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate fcache;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}

#[cfg(test)]
mod testing {
    use std::sync::Mutex;

    lazy_static::lazy_static! {
        /// Provides a global lock which has to be acquired if a test binds the test ports
        /// (1503 and 1504) on which the integration tests start their local nodes.
        pub static ref SHARED_TEST_RESOURCES: Mutex<()> = Mutex::new(());
    }

    /// Executes async code within a single threaded tokio runtime.
    pub fn test_async<F: std::future::Future>(future: F) {
        use tokio::runtime;

        let rt = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let _ = rt.block_on(future);
    }

    #[test]
    fn logging_can_be_initialized_repeatedly() {
        crate::init_logging();
        crate::init_logging();
        log::info!("Logging is up and running...");
    }
}
