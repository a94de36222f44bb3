//! Pluggable serialization for envelopes and primitive payloads.
//!
//! Two layers live here:
//!
//! - [`MessageCodec`] serializes any serde type. The access layer uses it for
//!   its own envelopes ([`RaftProposal`](crate::types::RaftProposal),
//!   [`ProposalInput`](crate::types::ProposalInput), …). [`JsonCodec`] is the
//!   default.
//! - [`Codec<I, O>`] is a typed pair of functions, one encoding a primitive's
//!   input and one decoding its output. It is a first-class value handed to a
//!   [`Handler`](crate::node::Handler) at construction, so dispatch never
//!   needs runtime type checks.
//!
//! # Example
//!
//! ```rust
//! use tidepool::codec::{Codec, JsonCodec, MessageCodec};
//!
//! let codec = JsonCodec;
//! let bytes = codec.encode(&42u64).unwrap();
//! let back: u64 = codec.decode(&bytes).unwrap();
//! assert_eq!(back, 42);
//!
//! let typed: Codec<String, u64> = Codec::json();
//! let input = typed.encode(&"hello".to_string()).unwrap();
//! assert_eq!(input, br#""hello""#);
//! assert_eq!(typed.decode(b"7").unwrap(), 7);
//! ```

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Failed to encode a value to bytes.
    #[error("encode error: {0}")]
    Encode(Box<dyn std::error::Error + Send + Sync>),
    /// Failed to decode bytes to a value.
    #[error("decode error: {0}")]
    Decode(Box<dyn std::error::Error + Send + Sync>),
}

/// Pluggable serialization format for serde types.
///
/// Requires `Clone + Send + Sync + 'static` so codec instances can be shared
/// between the executor, the apply path and the node server.
pub trait MessageCodec: Clone + Send + Sync + 'static {
    /// Encode a serializable value to bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes into a deserializable value.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if deserialization fails.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec using serde_json.
///
/// Human-readable, which keeps log entries and test assertions legible.
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

type EncodeFn<I> = dyn Fn(&I) -> Result<Vec<u8>, CodecError> + Send + Sync;
type DecodeFn<O> = dyn Fn(&[u8]) -> Result<O, CodecError> + Send + Sync;

/// Typed codec for one primitive: encodes inputs, decodes outputs.
///
/// Cloning is cheap (two `Arc`s).
pub struct Codec<I, O> {
    encode: Arc<EncodeFn<I>>,
    decode: Arc<DecodeFn<O>>,
}

impl<I, O> Codec<I, O> {
    /// Build a codec from an encode function and a decode function.
    pub fn new<E, D>(encode: E, decode: D) -> Self
    where
        E: Fn(&I) -> Result<Vec<u8>, CodecError> + Send + Sync + 'static,
        D: Fn(&[u8]) -> Result<O, CodecError> + Send + Sync + 'static,
    {
        Self {
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        }
    }

    /// Serialize an input.
    pub fn encode(&self, input: &I) -> Result<Vec<u8>, CodecError> {
        (self.encode)(input)
    }

    /// Deserialize an output.
    pub fn decode(&self, bytes: &[u8]) -> Result<O, CodecError> {
        (self.decode)(bytes)
    }
}

impl<I, O> Codec<I, O>
where
    I: Serialize + 'static,
    O: DeserializeOwned + 'static,
{
    /// Typed codec backed by a [`MessageCodec`].
    pub fn with_message_codec<C: MessageCodec>(codec: C) -> Self {
        let decoder = codec.clone();
        Self::new(
            move |input: &I| codec.encode(input),
            move |bytes: &[u8]| decoder.decode(bytes),
        )
    }

    /// Typed codec backed by [`JsonCodec`].
    pub fn json() -> Self {
        Self::with_message_codec(JsonCodec)
    }
}

impl Codec<Vec<u8>, Vec<u8>> {
    /// Pass-through codec for callers that already hold serialized payloads.
    pub fn raw() -> Self {
        Self::new(|input: &Vec<u8>| Ok(input.clone()), |bytes: &[u8]| Ok(bytes.to_vec()))
    }
}

impl<I, O> Clone for Codec<I, O> {
    fn clone(&self) -> Self {
        Self {
            encode: Arc::clone(&self.encode),
            decode: Arc::clone(&self.decode),
        }
    }
}

impl<I, O> fmt::Debug for Codec<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec")
            .field("input", &std::any::type_name::<I>())
            .field("output", &std::any::type_name::<O>())
            .finish()
    }
}
