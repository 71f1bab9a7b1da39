//! Defines the messages exchanged between peers and the codec used to put them on the wire.
//!
//! The messages are plain protobuf messages (via **prost**). However, the peer pool only talks to
//! a [Codec] so that the framing can be replaced without touching the HTTP layer.
//!
//! # Examples
//! ```
//! # use fcache::protocol::{Codec, FetchResponse, ProtobufCodec};
//! let codec = ProtobufCodec;
//! let data = codec.encode(&FetchResponse { value: b"630".to_vec() }).unwrap();
//! assert_eq!(codec.decode(&data).unwrap().value, b"630".to_vec());
//! ```
use prost::Message;

use crate::error::CacheError;

/// Describes which value is requested from a peer.
#[derive(Clone, PartialEq, Message)]
pub struct FetchRequest {
    /// Contains the name of the group to query.
    #[prost(string, tag = "1")]
    pub group: String,

    /// Contains the key to look up.
    #[prost(string, tag = "2")]
    pub key: String,
}

/// Carries the value delivered by a peer.
#[derive(Clone, PartialEq, Message)]
pub struct FetchResponse {
    /// Contains the raw bytes of the value.
    #[prost(bytes = "vec", tag = "1")]
    pub value: Vec<u8>,
}

/// Encodes and decodes the payload of peer responses.
pub trait Codec: Send + Sync {
    /// Serializes the given response into its wire format.
    fn encode(&self, response: &FetchResponse) -> Result<Vec<u8>, CacheError>;

    /// Parses a response from its wire format.
    fn decode(&self, data: &[u8]) -> Result<FetchResponse, CacheError>;
}

/// Provides the default codec which transfers responses as protobuf messages.
#[derive(Default, Clone, Copy)]
pub struct ProtobufCodec;

impl Codec for ProtobufCodec {
    fn encode(&self, response: &FetchResponse) -> Result<Vec<u8>, CacheError> {
        let mut buffer = Vec::with_capacity(response.encoded_len());
        response
            .encode(&mut buffer)
            .map_err(|error| CacheError::Internal(format!("Failed to encode response: {}", error)))?;

        Ok(buffer)
    }

    fn decode(&self, data: &[u8]) -> Result<FetchResponse, CacheError> {
        FetchResponse::decode(data)
            .map_err(|error| CacheError::Internal(format!("Failed to decode response: {}", error)))
    }
}
