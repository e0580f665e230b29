mod error;

pub use error::Error;

use crate::config::KvConfig;
use crate::connection::Connection;
use crate::stream::StreamAdmin;
use crate::subject::{
    KV_OPERATION_HEADER, is_valid_bucket, is_valid_key, kv_stream_name, kv_subject,
    kv_watch_subject,
};

use std::fmt::{Debug, Display, Formatter, Result as FmtResult};

use bytes::Bytes;
use courier_broker::{Broker, BrokerError, ErrorKind, Headers, StoredMessage, StreamSpec};
use courier_codec::Codec;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// What a revision of a key did.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KvOperation {
    /// A value was written.
    Put,

    /// The key was deleted, keeping its history.
    Delete,

    /// The key and its history were purged.
    Purge,
}

impl KvOperation {
    /// Reads the operation from the `KV-Operation` header value.
    #[must_use]
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some("DEL") => Self::Delete,
            Some("PURGE") => Self::Purge,
            _ => Self::Put,
        }
    }

    /// The header value marking this operation, `None` for puts.
    #[must_use]
    pub const fn as_header(self) -> Option<&'static str> {
        match self {
            Self::Put => None,
            Self::Delete => Some("DEL"),
            Self::Purge => Some("PURGE"),
        }
    }
}

impl Display for KvOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Put => f.write_str("put"),
            Self::Delete => f.write_str("delete"),
            Self::Purge => f.write_str("purge"),
        }
    }
}

/// The latest revision of a key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KvEntry {
    /// Bucket name.
    pub bucket: String,

    /// Key.
    pub key: String,

    /// Stream sequence of this revision.
    pub revision: u64,

    /// What this revision did.
    pub operation: KvOperation,

    /// Encoded value; empty for deletions.
    pub value: Bytes,
}

/// A key-value bucket stored as a stream with one subject per key.
#[derive(Debug)]
pub struct KvBucket<B, C>
where
    B: Broker,
    C: Codec,
{
    bucket: String,
    codec: C,
    connection: Connection<B>,
    stream: String,
}

impl<B, C> Clone for KvBucket<B, C>
where
    B: Broker,
    C: Codec,
{
    fn clone(&self) -> Self {
        Self {
            bucket: self.bucket.clone(),
            codec: self.codec.clone(),
            connection: self.connection.clone(),
            stream: self.stream.clone(),
        }
    }
}

impl<B, C> KvBucket<B, C>
where
    B: Broker,
    C: Codec,
{
    /// Opens `bucket`, creating its stream if needed, keeping one value per key.
    ///
    /// # Errors
    ///
    /// Fails if the bucket name is invalid or the stream cannot be ensured.
    pub async fn open(
        connection: &Connection<B>,
        bucket: &str,
        codec: C,
    ) -> Result<Self, Error<B::Error>> {
        Self::open_with(connection, KvConfig::new(bucket), codec).await
    }

    /// Opens a bucket with explicit history and storage settings.
    ///
    /// # Errors
    ///
    /// Same as [`Self::open`].
    pub async fn open_with(
        connection: &Connection<B>,
        config: KvConfig,
        codec: C,
    ) -> Result<Self, Error<B::Error>> {
        if !is_valid_bucket(&config.bucket) {
            return Err(Error::InvalidBucket(config.bucket));
        }

        let stream = kv_stream_name(&config.bucket);
        let spec = StreamSpec::new(stream.clone(), [kv_watch_subject(&config.bucket)])
            .with_storage(config.storage)
            .with_max_messages_per_subject(config.history.max(1));

        StreamAdmin::new(connection).ensure_stream(&spec).await?;
        debug!(bucket = %config.bucket, %stream, history = config.history, "bucket opened");

        Ok(Self {
            bucket: config.bucket,
            codec,
            connection: connection.clone(),
            stream,
        })
    }

    /// Bucket name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.bucket
    }

    /// Writes `value` under `key`, returning its revision.
    ///
    /// # Errors
    ///
    /// Fails if the key is invalid, the value cannot be encoded, or the broker
    /// rejects the write.
    pub async fn put<T>(&self, key: &str, value: &T) -> Result<u64, Error<B::Error>>
    where
        T: Debug + Serialize + ?Sized,
    {
        self.check_key(key)?;

        let payload = self.codec.encode(value).map_err(Error::Encode)?;
        let revision = self.publish(key, payload, None).await?;
        debug!(bucket = %self.bucket, %key, ?value, revision, "put");

        Ok(revision)
    }

    /// Reads and decodes the current value of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the key was never written or its latest
    /// revision is a deletion, and [`Error::Decode`] if the value does not
    /// decode into `T`.
    pub async fn get<T>(&self, key: &str) -> Result<T, Error<B::Error>>
    where
        T: Debug + DeserializeOwned,
    {
        let entry = match self.entry(key).await? {
            Some(entry) if entry.operation == KvOperation::Put => entry,
            _ => {
                debug!(bucket = %self.bucket, %key, "key not found");
                return Err(Error::NotFound {
                    bucket: self.bucket.clone(),
                    key: key.to_string(),
                });
            }
        };

        let value: T = self
            .codec
            .decode(&entry.value)
            .map_err(|source| Error::Decode {
                key: key.to_string(),
                source,
            })?;
        debug!(bucket = %self.bucket, %key, ?value, revision = entry.revision, "get");

        Ok(value)
    }

    /// The latest revision of `key`, including deletion markers.
    ///
    /// # Errors
    ///
    /// Fails if the key is invalid or the broker lookup fails.
    pub async fn entry(&self, key: &str) -> Result<Option<KvEntry>, Error<B::Error>> {
        self.check_key(key)?;

        let message = self
            .connection
            .broker()
            .last_message(&self.stream, &kv_subject(&self.bucket, key))
            .await
            .map_err(|e| self.broker_error(e))?;

        Ok(message.map(|message| self.to_entry(key, message)))
    }

    /// Marks `key` as deleted, returning the revision of the marker.
    ///
    /// # Errors
    ///
    /// Fails if the key is invalid or the broker rejects the write.
    pub async fn delete(&self, key: &str) -> Result<u64, Error<B::Error>> {
        self.check_key(key)?;

        let mut headers = Headers::new();
        if let Some(operation) = KvOperation::Delete.as_header() {
            headers.insert(KV_OPERATION_HEADER.to_string(), operation.to_string());
        }

        let revision = self.publish(key, Bytes::new(), Some(headers)).await?;
        debug!(bucket = %self.bucket, %key, revision, "deleted");

        Ok(revision)
    }

    fn check_key(&self, key: &str) -> Result<(), Error<B::Error>> {
        if self.connection.is_closed() {
            return Err(Error::Closed);
        }

        if !is_valid_key(key) {
            return Err(Error::InvalidKey(key.to_string()));
        }

        Ok(())
    }

    async fn publish(
        &self,
        key: &str,
        payload: Bytes,
        headers: Option<Headers>,
    ) -> Result<u64, Error<B::Error>> {
        self.connection
            .broker()
            .publish(&kv_subject(&self.bucket, key), payload, headers)
            .await
            .map_err(|e| self.broker_error(e))
    }

    fn broker_error(&self, source: B::Error) -> Error<B::Error> {
        if source.kind() == ErrorKind::Closed {
            return Error::Closed;
        }

        Error::Broker {
            bucket: self.bucket.clone(),
            source,
        }
    }

    fn to_entry(&self, key: &str, message: StoredMessage) -> KvEntry {
        let operation = KvOperation::from_header(
            message
                .headers
                .get(KV_OPERATION_HEADER)
                .map(String::as_str),
        );

        KvEntry {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            revision: message.sequence,
            operation,
            value: message.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use courier_broker_memory::{MemoryBroker, MemoryBrokerOptions, MemoryServer};
    use courier_codec::{JsonCodec, MsgPackCodec};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    struct Limits {
        burst: u32,
        rate: u32,
    }

    async fn connection() -> Connection<MemoryBroker> {
        let server = MemoryServer::start(format!("memory://{}", uuid::Uuid::new_v4()));
        let broker = MemoryBroker::connect(&[server.address().to_string()], MemoryBrokerOptions)
            .await
            .unwrap();

        Connection::new(broker)
    }

    #[test]
    fn test_operation_header_values() {
        assert_eq!(KvOperation::from_header(None), KvOperation::Put);
        assert_eq!(KvOperation::from_header(Some("DEL")), KvOperation::Delete);
        assert_eq!(KvOperation::from_header(Some("PURGE")), KvOperation::Purge);
        assert_eq!(KvOperation::Delete.as_header(), Some("DEL"));
        assert_eq!(KvOperation::Put.as_header(), None);
    }

    #[tokio::test]
    async fn test_put_then_get_returns_latest_value() {
        let connection = connection().await;
        let bucket = KvBucket::open(&connection, "limits", MsgPackCodec)
            .await
            .unwrap();

        let first = bucket
            .put("api.default", &Limits { burst: 5, rate: 10 })
            .await
            .unwrap();
        let second = bucket
            .put("api.default", &Limits { burst: 8, rate: 20 })
            .await
            .unwrap();

        assert!(second > first);
        assert_eq!(
            bucket.get::<Limits>("api.default").await.unwrap(),
            Limits { burst: 8, rate: 20 }
        );

        let entry = bucket.entry("api.default").await.unwrap().unwrap();
        assert_eq!(entry.revision, second);
        assert_eq!(entry.operation, KvOperation::Put);
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let connection = connection().await;
        let bucket = KvBucket::open(&connection, "cfg", JsonCodec).await.unwrap();

        let result = bucket.get::<bool>("cfg:flag").await;

        assert!(result.as_ref().is_err_and(Error::is_not_found));
        assert_eq!(bucket.entry("cfg:flag").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_leaves_tombstone() {
        let connection = connection().await;
        let bucket = KvBucket::open(&connection, "cfg", JsonCodec).await.unwrap();

        bucket.put("cfg:flag", &true).await.unwrap();
        let revision = bucket.delete("cfg:flag").await.unwrap();

        assert_matches!(bucket.get::<bool>("cfg:flag").await, Err(Error::NotFound { .. }));

        let entry = bucket.entry("cfg:flag").await.unwrap().unwrap();
        assert_eq!(entry.operation, KvOperation::Delete);
        assert_eq!(entry.revision, revision);
        assert!(entry.value.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type_is_decode_error() {
        let connection = connection().await;
        let bucket = KvBucket::open(&connection, "cfg", JsonCodec).await.unwrap();

        bucket.put("cfg:name", "edge").await.unwrap();

        assert_matches!(
            bucket.get::<u64>("cfg:name").await,
            Err(Error::Decode { ref key, .. }) if key == "cfg:name"
        );
    }

    #[tokio::test]
    async fn test_invalid_names_are_rejected() {
        let connection = connection().await;

        assert_matches!(
            KvBucket::open(&connection, "my.bucket", JsonCodec).await,
            Err(Error::InvalidBucket(_))
        );

        let bucket = KvBucket::open(&connection, "cfg", JsonCodec).await.unwrap();
        assert_matches!(bucket.put("flags.>", &1).await, Err(Error::InvalidKey(_)));
        assert_matches!(bucket.get::<u8>("a..b").await, Err(Error::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_reopen_shares_stream() {
        let connection = connection().await;

        let writer = KvBucket::open(&connection, "cfg", JsonCodec).await.unwrap();
        writer.put("cfg:flag", &true).await.unwrap();

        let reader = KvBucket::open(&connection, "cfg", JsonCodec).await.unwrap();
        assert!(reader.get::<bool>("cfg:flag").await.unwrap());
    }
}
