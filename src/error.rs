//! Defines the errors reported when looking up values.
//!
//! All errors are cheap to clone, as the result of a single load is shared among all callers
//! which asked for the same key while the load was in flight.
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Enumerates the errors which can occur while fetching a value.
#[derive(Debug, Clone)]
pub enum CacheError {
    /// The request itself was invalid (e.g. an empty key was given).
    Validation(String),

    /// Either the requested group is unknown or the backing source doesn't know the key.
    NotFound(String),

    /// A peer couldn't be reached, responded with an error or sent a malformed payload.
    Transport(String),

    /// Encoding or decoding a value failed or a load was aborted unexpectedly.
    Internal(String),

    /// The backing loader failed. The error is handed to the caller as is.
    Loader(Arc<anyhow::Error>),
}

impl CacheError {
    /// Creates the error to report if the backing source has no value for the given key.
    ///
    /// # Examples
    /// ```
    /// # use fcache::error::CacheError;
    /// let error = CacheError::not_found("Absent");
    /// assert_eq!(error.to_string(), "Not found: key Absent not found");
    /// ```
    pub fn not_found(key: &str) -> Self {
        CacheError::NotFound(format!("key {} not found", key))
    }

    /// Determines if this error signals an invalid request rather than a failed lookup.
    pub fn is_validation(&self) -> bool {
        matches!(self, CacheError::Validation(_))
    }
}

impl From<anyhow::Error> for CacheError {
    fn from(error: anyhow::Error) -> Self {
        CacheError::Loader(Arc::new(error))
    }
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            CacheError::Validation(message) => write!(f, "Invalid request: {}", message),
            CacheError::NotFound(message) => write!(f, "Not found: {}", message),
            CacheError::Transport(message) => write!(f, "Transport error: {}", message),
            CacheError::Internal(message) => write!(f, "Internal error: {}", message),
            CacheError::Loader(error) => write!(f, "Loader error: {:#}", error),
        }
    }
}

impl Error for CacheError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CacheError::Loader(error) => Some(&***error),
            _ => None,
        }
    }
}
