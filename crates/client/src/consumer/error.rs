use std::error::Error as StdError;

use courier_broker::{BrokerError, SpecError};
use thiserror::Error;

/// Errors that can occur starting or running a consumer task.
#[derive(Debug, Error)]
pub enum Error<BE>
where
    BE: BrokerError,
{
    /// The connection has been closed.
    #[error("connection is closed")]
    Closed,

    /// A non-timeout fetch failure. Terminates the task.
    #[error("fetch failed for durable '{durable}': {source}")]
    Fetch {
        /// Durable name.
        durable: String,
        /// Broker error.
        source: BE,
    },

    /// The callback failed. Terminates the task; the message stays unacknowledged.
    #[error("handler failed for durable '{durable}': {source}")]
    Handler {
        /// Durable name.
        durable: String,
        /// Handler error.
        source: Box<dyn StdError + Send + Sync>,
    },

    /// The consumer spec is invalid.
    #[error(transparent)]
    InvalidSpec(#[from] SpecError),

    /// Shutdown has begun; no new tasks are accepted.
    #[error("shutdown in progress, not accepting new consumers")]
    ShuttingDown,

    /// The durable consumer could not be created or resumed.
    #[error("failed to subscribe durable '{durable}': {source}")]
    Subscribe {
        /// Durable name.
        durable: String,
        /// Broker error.
        source: BE,
    },
}
