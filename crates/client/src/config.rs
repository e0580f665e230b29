use std::time::Duration;

use courier_broker::{ConsumerSpec, DeliverPolicy, StorageKind};

/// Default server list when none is configured.
pub const DEFAULT_SERVER: &str = "nats://127.0.0.1:30114";

/// Settings for establishing the broker connection.
#[derive(Clone, Debug)]
pub struct ConnectConfig {
    /// Servers to try, in order. Must not be empty.
    pub servers: Vec<String>,

    /// Maximum number of connection attempts. Defaults to 3.
    pub max_attempts: usize,

    /// Timeout for a single attempt. Defaults to 5 seconds.
    pub connect_timeout: Duration,

    /// Base delay for exponential backoff between attempts. Defaults to 100ms.
    pub retry_base_delay: Duration,

    /// Maximum delay for exponential backoff. Defaults to 5 seconds.
    pub retry_max_delay: Duration,
}

impl ConnectConfig {
    /// Default settings for the given servers.
    pub fn new<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            servers: vec![DEFAULT_SERVER.to_string()],
            max_attempts: 3,
            connect_timeout: Duration::from_secs(5),
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(5),
        }
    }
}

/// How a consumer task polls its pull consumer.
#[derive(Clone, Copy, Debug)]
pub struct PollOptions {
    /// Messages requested per fetch. Defaults to 1.
    pub batch_size: usize,

    /// How long a fetch waits for the first message. Defaults to 5 seconds.
    pub fetch_timeout: Duration,

    /// Pause after a fetch that returned nothing. Defaults to 1 second.
    pub idle_backoff: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            batch_size: 1,
            fetch_timeout: Duration::from_secs(5),
            idle_backoff: Duration::from_secs(1),
        }
    }
}

/// Settings for the consumer task supervisor.
#[derive(Clone, Copy, Debug)]
pub struct SupervisorConfig {
    /// Poll settings used by [`crate::ConsumerSupervisor::add_subscription`].
    pub poll: PollOptions,

    /// How long [`crate::ConsumerSupervisor::cancel`] waits before aborting a
    /// task. Defaults to 10 seconds.
    pub grace_period: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll: PollOptions::default(),
            grace_period: Duration::from_secs(10),
        }
    }
}

/// Settings for a bucket watch.
#[derive(Clone, Copy, Debug)]
pub struct WatchOptions {
    /// Where a new watcher starts. Defaults to replaying the full history.
    pub deliver_policy: DeliverPolicy,

    /// How long the broker waits for the callback to acknowledge an event.
    pub ack_wait: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            deliver_policy: DeliverPolicy::All,
            ack_wait: ConsumerSpec::DEFAULT_ACK_WAIT,
        }
    }
}

/// Settings for a key-value bucket.
#[derive(Clone, Debug)]
pub struct KvConfig {
    /// Bucket name.
    pub bucket: String,

    /// Values kept per key. Defaults to 1.
    pub history: i64,

    /// Storage of the backing stream. Defaults to file.
    pub storage: StorageKind,
}

impl KvConfig {
    /// Default settings for `bucket`.
    pub fn new<S>(bucket: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            bucket: bucket.into(),
            history: 1,
            storage: StorageKind::File,
        }
    }
}

/// Settings for the shutdown coordinator.
#[derive(Clone, Copy, Debug)]
pub struct ShutdownConfig {
    /// How long shutdown waits for tasks before aborting them. Defaults to 10 seconds.
    pub grace_period: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(10),
        }
    }
}
