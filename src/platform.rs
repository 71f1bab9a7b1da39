//! Provides a tiny DI like container which keeps the central components of a cache node.
//!
//! A node registers its [Groups](crate::group::Groups), its [PeerPool](crate::pool::PeerPool),
//! the [Config](crate::config::Config) and the [Server](crate::server::Server) here, so that
//! each of them can look up the others by type instead of relying on global state.
//!
//! The platform also owns the central **is_running** flag. Once
//! [Platform::terminate](Platform::terminate) is invoked, all components are released and all
//! loops (server, config monitor, peer config listener) wind down. Code which might run after
//! a shutdown was initiated should therefore use [Platform::find](Platform::find) rather than
//! [Platform::require](Platform::require).
//!
//! # Examples
//!
//! ```
//! # use std::sync::Arc;
//! # use fcache::platform::Platform;
//! # use fcache::group::Groups;
//! let platform = Platform::new();
//! platform.register::<Groups>(Arc::new(Groups::new()));
//!
//! assert_eq!(platform.require::<Groups>().names().is_empty(), true);
//! assert_eq!(platform.is_running(), true);
//!
//! platform.terminate();
//! assert_eq!(platform.find::<Groups>().is_none(), true);
//! assert_eq!(platform.is_running(), false);
//! ```
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Keeps all central components of a node in a single place.
pub struct Platform {
    services: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    is_running: AtomicBool,
}

impl Platform {
    /// Creates a new and running platform without any components.
    pub fn new() -> Arc<Self> {
        Arc::new(Platform {
            services: Mutex::new(HashMap::new()),
            is_running: AtomicBool::new(true),
        })
    }

    /// Registers a component. An already registered component of the same type is replaced.
    pub fn register<T>(&self, service: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        let _ = self
            .services
            .lock()
            .unwrap()
            .insert(TypeId::of::<T>(), service);
    }

    /// Tries to resolve a previously registered component.
    pub fn find<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.services
            .lock()
            .unwrap()
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.clone().downcast::<T>().ok())
    }

    /// Resolves a previously registered component.
    ///
    /// # Panics
    /// Panics if the requested component isn't available, which is also the case once the
    /// platform has been terminated.
    ///
    /// ```should_panic
    /// # use fcache::platform::Platform;
    /// # use fcache::pool::PeerPool;
    /// let platform = Platform::new();
    /// platform.require::<PeerPool>();
    /// ```
    pub fn require<T>(&self) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        if !self.is_running() {
            panic!(
                "A required component ({}) has been requested but the system is already shutting down!",
                std::any::type_name::<T>()
            );
        }

        match self.find::<T>() {
            Some(service) => service,
            None => panic!(
                "A required component ({}) was not available in the platform registry!",
                std::any::type_name::<T>()
            ),
        }
    }

    /// Determines if the platform is still running or if [Platform::terminate](Platform::terminate)
    /// has already been called.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Terminates the platform.
    ///
    /// This releases all components and toggles the [is_running()](Platform::is_running) flag to
    /// **false**, which makes all background loops exit.
    pub fn terminate(&self) {
        self.services.lock().unwrap().clear();
        self.is_running.store(false, Ordering::Release);
    }
}
