//! Collapses concurrent calls for the same key into a single execution.
//!
//! If a call for a key is already in flight, further callers for this key simply wait for its
//! outcome instead of running their own work. Once the work is done, the call record is removed
//! so that the next caller starts a fresh execution.
//!
//! The work is executed on a separate tokio task. Therefore it always runs to completion, even
//! if all callers have given up waiting for it.
//!
//! # Examples
//! ```
//! # use fcache::singleflight::SingleFlight;
//! # #[tokio::main]
//! # async fn main() {
//! let flight = SingleFlight::new();
//! let result = flight.work("Tom", async { Ok("630".to_owned()) }).await;
//! assert_eq!(result.unwrap(), "630");
//! # }
//! ```
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::error::CacheError;

/// Contains the outcome of a call or **None** while it is still being executed.
type Outcome<T> = Option<Result<T, CacheError>>;

type Calls<T> = Arc<Mutex<HashMap<String, watch::Receiver<Outcome<T>>>>>;

/// Keeps track of all calls which are currently in flight.
pub struct SingleFlight<T> {
    calls: Calls<T>,
}

/// Removes the call record of a key once its work has completed (or panicked).
struct CallGuard<T> {
    calls: Calls<T>,
    key: String,
}

impl<T> Drop for CallGuard<T> {
    fn drop(&mut self) {
        if let Ok(mut calls) = self.calls.lock() {
            let _ = calls.remove(&self.key);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        SingleFlight::new()
    }
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    /// Creates a new instance without any calls in flight.
    pub fn new() -> Self {
        SingleFlight {
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Executes the given work unless a call for the same key is already in flight.
    ///
    /// In the latter case, the given work is discarded and the outcome of the running call is
    /// returned instead. Therefore all concurrent callers for a key observe the identical result.
    pub async fn work<F>(&self, key: &str, work: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>> + Send + 'static,
    {
        let mut receiver = {
            let mut calls = self.calls.lock().unwrap();
            match calls.get(key) {
                Some(receiver) => {
                    log::debug!("Joining in-flight call for {}...", key);
                    receiver.clone()
                }
                None => {
                    let (sender, receiver) = watch::channel(None);
                    let _ = calls.insert(key.to_owned(), receiver.clone());

                    let guard = CallGuard {
                        calls: self.calls.clone(),
                        key: key.to_owned(),
                    };
                    crate::spawn!(async move {
                        let result = work.await;
                        let _ = sender.send_replace(Some(result));
                        drop(guard);
                    });

                    receiver
                }
            }
        };

        let outcome = match receiver.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };

        outcome.unwrap_or_else(|| {
            Err(CacheError::Internal(format!(
                "The call for {} was aborted unexpectedly",
                key
            )))
        })
    }

    /// Returns the number of calls which are currently in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}
