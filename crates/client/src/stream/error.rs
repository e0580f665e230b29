use courier_broker::{BrokerError, SpecError};
use thiserror::Error;

/// Errors that can occur administering streams.
#[derive(Debug, Error)]
pub enum Error<BE>
where
    BE: BrokerError,
{
    /// The broker rejected an administrative request. Not retried.
    #[error("failed to administer stream '{stream}': {source}")]
    Admin {
        /// Stream name.
        stream: String,
        /// Broker error.
        source: BE,
    },

    /// The connection has been closed.
    #[error("connection is closed")]
    Closed,

    /// The stream spec is invalid.
    #[error(transparent)]
    InvalidSpec(#[from] SpecError),
}
