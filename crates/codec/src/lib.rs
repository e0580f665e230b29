//! Pluggable payload codecs used to move typed values through the broker.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::fmt::Debug;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Converts values to and from the bytes carried in broker payloads.
///
/// Implementations must be deterministic for a given value so that
/// `decode(encode(v)) == v` for every serializable `v`.
pub trait Codec
where
    Self: Clone + Debug + Default + Send + Sync + 'static,
{
    /// Short name of the wire format, used in errors and logs.
    fn format(&self) -> &'static str;

    /// Encodes a value into a payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if the value cannot be represented in this format.
    fn encode<T>(&self, value: &T) -> Result<Bytes, Error>
    where
        T: Serialize + ?Sized;

    /// Decodes a payload into a value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the bytes are malformed or do not match `T`.
    fn decode<T>(&self, bytes: &[u8]) -> Result<T, Error>
    where
        T: DeserializeOwned;
}

/// `MessagePack` with named struct fields. This is the default codec and is
/// wire compatible with other msgpack producers writing maps.
#[derive(Clone, Copy, Debug, Default)]
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    fn format(&self) -> &'static str {
        "msgpack"
    }

    fn encode<T>(&self, value: &T) -> Result<Bytes, Error>
    where
        T: Serialize + ?Sized,
    {
        rmp_serde::to_vec_named(value)
            .map(Bytes::from)
            .map_err(|e| Error::encode(self.format(), e))
    }

    fn decode<T>(&self, bytes: &[u8]) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        rmp_serde::from_slice(bytes).map_err(|e| Error::decode(self.format(), e))
    }
}

/// CBOR via `ciborium`.
#[derive(Clone, Copy, Debug, Default)]
pub struct CborCodec;

impl Codec for CborCodec {
    fn format(&self) -> &'static str {
        "cbor"
    }

    fn encode<T>(&self, value: &T) -> Result<Bytes, Error>
    where
        T: Serialize + ?Sized,
    {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf).map_err(|e| Error::encode(self.format(), e))?;

        Ok(Bytes::from(buf))
    }

    fn decode<T>(&self, bytes: &[u8]) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        ciborium::from_reader(bytes).map_err(|e| Error::decode(self.format(), e))
    }
}

/// Plain JSON. Handy when payloads are produced by tooling such as the `nats` CLI.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn format(&self) -> &'static str {
        "json"
    }

    fn encode<T>(&self, value: &T) -> Result<Bytes, Error>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| Error::encode(self.format(), e))
    }

    fn decode<T>(&self, bytes: &[u8]) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(bytes).map_err(|e| Error::decode(self.format(), e))
    }
}
