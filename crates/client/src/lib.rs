//! Orchestration of durable consumers, key-value buckets and bucket watches
//! over a JetStream-style broker.
//!
//! A [`ConnectionManager`] owns the transport. Every other component takes a
//! shared [`Connection`] and registers its background loops with the
//! connection's task registry, so [`ConnectionManager::disconnect`] can stop
//! watches, then consumers, then close the transport.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod connection;
mod consumer;
mod kv;
mod publisher;
mod registry;
mod shutdown;
mod stream;
mod watch;

/// Mapping of buckets and keys onto streams and subjects.
pub mod subject;

pub use config::{
    ConnectConfig, DEFAULT_SERVER, KvConfig, PollOptions, ShutdownConfig, SupervisorConfig,
    WatchOptions,
};
pub use connection::{Connection, ConnectionManager, Error as ConnectionError};
pub use consumer::{
    ConsumerHandler, ConsumerHandlerError, ConsumerSupervisor, Error as ConsumerError,
};
pub use kv::{Error as KvError, KvBucket, KvEntry, KvOperation};
pub use publisher::{Error as PublishError, Publisher};
pub use registry::{TaskError, TaskHandle, TaskId, TaskKind, TaskOutcome, TaskReport};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use stream::{Error as StreamError, StreamAdmin};
pub use watch::{
    BucketWatcher, Error as WatchError, WatchEvent, WatchHandler, WatchHandlerError,
};

pub use courier_broker::{
    AckError, AckPolicy, Broker, ConsumerSpec, DeliverPolicy, Delivery, DeliveryInfo, StorageKind,
    StreamInfo, StreamSpec,
};
pub use courier_codec::{CborCodec, Codec, JsonCodec, MsgPackCodec};
