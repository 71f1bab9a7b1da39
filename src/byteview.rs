//! Provides the immutable value type stored in every cache.
//!
//! A [ByteView] wraps the bytes delivered by a backing loader or a peer. The underlying buffer
//! is never handed out by reference. Each accessor yields an independent copy so that a caller
//! can never modify a value which is still shared by the cache.
//!
//! # Examples
//! ```
//! # use fcache::byteview::ByteView;
//! let view = ByteView::from("630");
//! assert_eq!(view.len(), 3);
//! assert_eq!(view.to_string(), "630");
//!
//! // Modifying a copy doesn't affect the view...
//! let mut copy = view.byte_slice();
//! copy[0] = b'7';
//! assert_eq!(view.to_string(), "630");
//! ```
use std::fmt::{Debug, Display, Formatter};

use bytes::Bytes;

use crate::lru::ByteSize;

/// Represents an immutable view of a byte sequence.
///
/// Cloning a view is cheap, as all clones share the same (immutable) buffer.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteView {
    bytes: Bytes,
}

impl ByteView {
    /// Creates a view which takes ownership of the given bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        ByteView {
            bytes: Bytes::from(bytes),
        }
    }

    /// Returns the number of bytes in this view.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Determines if this view contains no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns a copy of the underlying bytes.
    pub fn byte_slice(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }
}

impl ByteSize for ByteView {
    fn byte_size(&self) -> usize {
        self.bytes.len()
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(bytes: Vec<u8>) -> Self {
        ByteView::new(bytes)
    }
}

impl From<&str> for ByteView {
    fn from(value: &str) -> Self {
        ByteView {
            bytes: Bytes::copy_from_slice(value.as_bytes()),
        }
    }
}

impl Display for ByteView {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.bytes))
    }
}

impl Debug for ByteView {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ByteView({:?})", String::from_utf8_lossy(&self.bytes))
    }
}
