use std::error::Error as StdError;

use courier_broker::{BrokerError, SpecError};
use thiserror::Error;

/// Errors that can occur starting or running a bucket watch.
#[derive(Debug, Error)]
pub enum Error<BE>
where
    BE: BrokerError,
{
    /// The connection has been closed.
    #[error("connection is closed")]
    Closed,

    /// The callback failed. Terminates the watch; the event stays unacknowledged.
    #[error("watch handler failed for bucket '{bucket}': {source}")]
    Handler {
        /// Bucket name.
        bucket: String,
        /// Handler error.
        source: Box<dyn StdError + Send + Sync>,
    },

    /// The bucket name is not usable.
    #[error("invalid bucket name '{0}'")]
    InvalidBucket(String),

    /// The watcher consumer spec is invalid.
    #[error(transparent)]
    InvalidSpec(#[from] SpecError),

    /// Shutdown has begun; no new watches are accepted.
    #[error("shutdown in progress, not accepting new watches")]
    ShuttingDown,

    /// The watcher consumer could not be created or resumed.
    #[error("failed to watch bucket '{bucket}': {source}")]
    Subscribe {
        /// Bucket name.
        bucket: String,
        /// Broker error.
        source: BE,
    },

    /// The subscription failed while running. Terminates the watch.
    #[error("watch on bucket '{bucket}' failed: {source}")]
    Subscription {
        /// Bucket name.
        bucket: String,
        /// Broker error.
        source: BE,
    },
}
