//! Transport contract between the orchestration layer and a JetStream-style broker.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod delivery;
mod error;
mod spec;

/// Subject syntax and wildcard matching.
pub mod subject;

pub use delivery::{AckError, Acker, Delivery, DeliveryInfo, Headers, StoredMessage};
pub use error::{BrokerError, ErrorKind, SpecError};
pub use spec::{AckPolicy, ConsumerSpec, DeliverPolicy, StorageKind, StreamInfo, StreamSpec};

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

/// Marker trait for broker connection options.
pub trait BrokerOptions: Clone + Debug + Send + Sync + 'static {}

/// A durable pull consumer bound to one client.
#[async_trait]
pub trait PullConsumer
where
    Self: Debug + Send + Sized + 'static,
{
    /// The error type for the consumer.
    type Error: BrokerError;

    /// Requests up to `max_messages`, waiting at most `expires` for the first one.
    ///
    /// An empty batch means nothing was available before the request expired.
    /// Transports may instead report that case as an error whose kind is
    /// [`ErrorKind::TimedOut`]; callers must treat both the same way.
    async fn fetch(
        &mut self,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<Delivery>, Self::Error>;

    /// Detaches this client from the consumer. The durable position stays on
    /// the broker so another subscription with the same name resumes from it.
    async fn unsubscribe(self) -> Result<(), Self::Error>;
}

/// A continuous, unbatched feed of deliveries from a durable consumer.
#[async_trait]
pub trait Subscription
where
    Self: Debug + Send + Sized + 'static,
{
    /// The error type for the subscription.
    type Error: BrokerError;

    /// Waits for the next delivery. `None` means the feed has ended.
    async fn next(&mut self) -> Option<Result<Delivery, Self::Error>>;

    /// Detaches this client from the consumer, keeping the durable position.
    async fn unsubscribe(self) -> Result<(), Self::Error>;
}

/// A connected broker client with persistent-stream support.
#[async_trait]
pub trait Broker
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the broker.
    type Error: BrokerError;

    /// The options used to connect.
    type Options: BrokerOptions;

    /// Pull consumer handle.
    type PullConsumer: PullConsumer<Error = Self::Error>;

    /// Continuous subscription handle.
    type Subscription: Subscription<Error = Self::Error>;

    /// Connects to the first reachable server in `servers`.
    async fn connect(servers: &[String], options: Self::Options) -> Result<Self, Self::Error>;

    /// Publishes a payload and waits for the stream to persist it, returning
    /// its stream sequence.
    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        headers: Option<Headers>,
    ) -> Result<u64, Self::Error>;

    /// Looks a stream up by name. `Ok(None)` when it does not exist.
    async fn stream_info(&self, name: &str) -> Result<Option<StreamInfo>, Self::Error>;

    /// Creates a stream. Fails with [`ErrorKind::AlreadyExists`] if the name is taken.
    async fn add_stream(&self, spec: &StreamSpec) -> Result<StreamInfo, Self::Error>;

    /// Returns the newest message on `subject` in `stream`, if any.
    async fn last_message(
        &self,
        stream: &str,
        subject: &str,
    ) -> Result<Option<StoredMessage>, Self::Error>;

    /// Creates or resumes the durable pull consumer described by `spec` on the
    /// stream capturing its subject.
    async fn pull_subscribe(&self, spec: &ConsumerSpec) -> Result<Self::PullConsumer, Self::Error>;

    /// Creates or resumes the durable consumer described by `spec` as a
    /// continuous feed.
    async fn subscribe(&self, spec: &ConsumerSpec) -> Result<Self::Subscription, Self::Error>;

    /// Flushes outstanding work and closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;
}
