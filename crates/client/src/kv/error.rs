use courier_broker::BrokerError;
use thiserror::Error;

/// Errors that can occur using a key-value bucket.
#[derive(Debug, Error)]
pub enum Error<BE>
where
    BE: BrokerError,
{
    /// The broker rejected a read or write.
    #[error("bucket '{bucket}' request failed: {source}")]
    Broker {
        /// Bucket name.
        bucket: String,
        /// Broker error.
        source: BE,
    },

    /// The connection has been closed.
    #[error("connection is closed")]
    Closed,

    /// A stored value could not be decoded into the requested type.
    #[error("failed to decode value of key '{key}': {source}")]
    Decode {
        /// Key.
        key: String,
        /// Codec error.
        source: courier_codec::Error,
    },

    /// A value could not be encoded.
    #[error(transparent)]
    Encode(courier_codec::Error),

    /// The bucket name is not usable as a stream name.
    #[error("invalid bucket name '{0}'")]
    InvalidBucket(String),

    /// The key is empty or contains wildcards or whitespace.
    #[error("invalid key '{0}'")]
    InvalidKey(String),

    /// The key has no value, or its latest revision is a deletion.
    #[error("key '{key}' not found in bucket '{bucket}'")]
    NotFound {
        /// Bucket name.
        bucket: String,
        /// Key.
        key: String,
    },

    /// The backing stream could not be ensured.
    #[error(transparent)]
    Stream(#[from] crate::stream::Error<BE>),
}

impl<BE> Error<BE>
where
    BE: BrokerError,
{
    /// Whether this is [`Error::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
