mod error;

pub use error::Error;

use crate::config::{ShutdownConfig, WatchOptions};
use crate::connection::Connection;
use crate::kv::KvOperation;
use crate::registry::{TaskError, TaskHandle, TaskKind, TaskOutcome};
use crate::subject::{
    KV_OPERATION_HEADER, is_valid_bucket, key_from_subject, kv_watch_subject,
    watcher_durable_name,
};

use std::error::Error as StdError;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use courier_broker::{
    AckError, Broker, BrokerError, ConsumerSpec, Delivery, ErrorKind, Subscription,
};
use courier_codec::Codec;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Marker trait for watch handler errors.
pub trait WatchHandlerError: StdError + Send + Sync + 'static {}

/// One change to a key of a watched bucket.
#[derive(Debug)]
pub struct WatchEvent<T> {
    /// Bucket name.
    pub bucket: String,

    /// Key that changed.
    pub key: String,

    /// What the change did.
    pub operation: KvOperation,

    /// Stream sequence of the change.
    pub revision: u64,

    /// Decoded value; `None` for deletions and purges.
    pub value: Option<T>,

    delivery: Delivery,
}

impl<T> WatchEvent<T> {
    /// Acknowledges the change; the watcher will not see it again.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the acknowledgement could not be sent.
    pub async fn ack(&self) -> Result<(), AckError> {
        self.delivery.ack().await
    }

    /// Asks for the change to be delivered again, optionally after `delay`.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the request could not be sent.
    pub async fn nak(&self, delay: Option<Duration>) -> Result<(), AckError> {
        self.delivery.nak(delay).await
    }

    /// How many times this change has been delivered, including this time.
    #[must_use]
    pub const fn delivered(&self) -> u64 {
        self.delivery.info().delivered
    }
}

/// Application callback for bucket changes, decoded into `T`.
#[async_trait]
pub trait WatchHandler<T>
where
    Self: Clone + Debug + Send + Sync + 'static,
    T: Send + 'static,
{
    /// The error type for the handler.
    type Error: WatchHandlerError;

    /// Handles one change. Acknowledge through [`WatchEvent::ack`].
    async fn on_change(&self, event: WatchEvent<T>) -> Result<(), Self::Error>;

    /// Called when a stored value does not decode into `T`. The change is left
    /// unacknowledged and the watch keeps running.
    fn on_decode_error(&self, bucket: &str, key: &str, error: &courier_codec::Error) {
        warn!(%bucket, %key, %error, "failed to decode watched value");
    }
}

/// Starts durable watches over key-value buckets.
#[derive(Debug)]
pub struct BucketWatcher<B, C>
where
    B: Broker,
    C: Codec,
{
    codec: C,
    connection: Connection<B>,
    grace_period: Duration,
}

impl<B, C> Clone for BucketWatcher<B, C>
where
    B: Broker,
    C: Codec,
{
    fn clone(&self) -> Self {
        Self {
            codec: self.codec.clone(),
            connection: self.connection.clone(),
            grace_period: self.grace_period,
        }
    }
}

impl<B, C> BucketWatcher<B, C>
where
    B: Broker,
    C: Codec,
{
    /// Creates a watcher on `connection` decoding values with `codec`.
    #[must_use]
    pub fn new(connection: &Connection<B>, codec: C) -> Self {
        Self {
            codec,
            connection: connection.clone(),
            grace_period: ShutdownConfig::default().grace_period,
        }
    }

    /// Sets how long [`Self::cancel`] waits before aborting a watch.
    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Cancels one watch and waits for it, aborting it after the grace period.
    ///
    /// The durable position stays on the broker. Returns `None` if the watch
    /// is unknown or its outcome was already collected.
    pub async fn cancel(&self, handle: &TaskHandle) -> Option<TaskOutcome> {
        let deadline = Instant::now() + self.grace_period;

        self.connection
            .registry()
            .cancel(handle.id(), deadline)
            .await
            .map(|report| report.outcome)
    }

    /// Watches every key of `bucket`, replaying its full history first.
    ///
    /// The bucket must already exist. Its watcher is the durable
    /// `<bucket>_watcher`, so a restarted watch resumes where the last one
    /// acknowledged.
    ///
    /// # Errors
    ///
    /// Fails if the bucket name is invalid, the subscription cannot be
    /// created, or shutdown has begun.
    pub async fn watch_bucket<T, H>(
        &self,
        bucket: &str,
        handler: H,
    ) -> Result<TaskHandle, Error<B::Error>>
    where
        T: DeserializeOwned + Send + 'static,
        H: WatchHandler<T>,
    {
        self.watch_bucket_with(bucket, handler, WatchOptions::default())
            .await
    }

    /// Watches `bucket` with an explicit deliver policy and `ack_wait`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::watch_bucket`].
    pub async fn watch_bucket_with<T, H>(
        &self,
        bucket: &str,
        handler: H,
        options: WatchOptions,
    ) -> Result<TaskHandle, Error<B::Error>>
    where
        T: DeserializeOwned + Send + 'static,
        H: WatchHandler<T>,
    {
        if !is_valid_bucket(bucket) {
            return Err(Error::InvalidBucket(bucket.to_string()));
        }

        let spec = ConsumerSpec::new(kv_watch_subject(bucket), watcher_durable_name(bucket))
            .with_deliver_policy(options.deliver_policy)
            .with_ack_wait(options.ack_wait);
        spec.validate()?;

        if self.connection.is_closed() {
            return Err(Error::Closed);
        }

        if self.connection.registry().is_closed() {
            return Err(Error::ShuttingDown);
        }

        let subscription = self
            .connection
            .broker()
            .subscribe(&spec)
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::Closed {
                    Error::Closed
                } else {
                    Error::Subscribe {
                        bucket: bucket.to_string(),
                        source: e,
                    }
                }
            })?;

        info!(
            %bucket,
            durable = %spec.durable_name(),
            deliver_policy = ?options.deliver_policy,
            "watching bucket"
        );

        let bucket = bucket.to_string();
        let codec = self.codec.clone();

        self.connection
            .registry()
            .spawn(format!("watch:{bucket}"), TaskKind::Watch, move |token| {
                watch_loop::<_, _, T, _>(subscription, handler, codec, bucket, token)
            })
            .map_err(|_| Error::ShuttingDown)
    }
}

async fn watch_loop<S, C, T, H>(
    mut subscription: S,
    handler: H,
    codec: C,
    bucket: String,
    token: CancellationToken,
) -> Result<(), TaskError>
where
    S: Subscription,
    C: Codec,
    T: DeserializeOwned + Send + 'static,
    H: WatchHandler<T>,
{
    let result =
        run::<S, C, T, H>(&mut subscription, &handler, &codec, &bucket, &token).await;

    if let Err(e) = subscription.unsubscribe().await {
        warn!(%bucket, error = %e, "failed to unsubscribe watcher");
    }

    match result {
        Ok(()) => {
            debug!(%bucket, "watch loop exited");
            Ok(())
        }
        Err(e) => {
            error!(%bucket, error = %e, "watch task terminated");
            Err(Box::new(e))
        }
    }
}

async fn run<S, C, T, H>(
    subscription: &mut S,
    handler: &H,
    codec: &C,
    bucket: &str,
    token: &CancellationToken,
) -> Result<(), Error<S::Error>>
where
    S: Subscription,
    C: Codec,
    T: DeserializeOwned + Send + 'static,
    H: WatchHandler<T>,
{
    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => return Ok(()),
            next = subscription.next() => next,
        };

        let delivery = match next {
            None => {
                debug!(%bucket, "watch subscription ended");
                return Ok(());
            }
            Some(Ok(delivery)) => delivery,
            Some(Err(e)) if e.is_timeout() => continue,
            Some(Err(e)) => {
                return Err(Error::Subscription {
                    bucket: bucket.to_string(),
                    source: e,
                });
            }
        };

        let Some(key) = key_from_subject(bucket, delivery.subject()).map(str::to_string) else {
            warn!(%bucket, subject = %delivery.subject(), "ignoring message outside bucket");
            continue;
        };

        let operation = KvOperation::from_header(delivery.header(KV_OPERATION_HEADER));
        let value = if operation == KvOperation::Put {
            match delivery.decode::<T, C>(codec) {
                Ok(value) => Some(value),
                Err(e) => {
                    handler.on_decode_error(bucket, &key, &e);
                    continue;
                }
            }
        } else {
            None
        };

        let revision = delivery.info().stream_sequence;
        debug!(%bucket, %key, %operation, revision, "bucket changed");

        handler
            .on_change(WatchEvent {
                bucket: bucket.to_string(),
                key,
                operation,
                revision,
                value,
                delivery,
            })
            .await
            .map_err(|e| Error::Handler {
                bucket: bucket.to_string(),
                source: Box::new(e),
            })?;
    }
}
