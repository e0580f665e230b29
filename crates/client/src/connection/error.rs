use std::time::Duration;

use courier_broker::BrokerError;
use thiserror::Error;

/// Errors that can occur establishing or using the connection.
#[derive(Debug, Error)]
pub enum Error<BE>
where
    BE: BrokerError,
{
    /// The connection has been closed.
    #[error("connection is closed")]
    Closed,

    /// Every attempt failed.
    #[error("failed to connect after {attempts} attempts: {source}")]
    Connect {
        /// Attempts made.
        attempts: usize,
        /// Error of the last attempt.
        source: BE,
    },

    /// The server list was empty.
    #[error("no servers configured")]
    NoServers,

    /// Every attempt timed out.
    #[error("connection timed out after {attempts} attempts of {timeout:?}")]
    Timeout {
        /// Attempts made.
        attempts: usize,
        /// Per-attempt timeout.
        timeout: Duration,
    },
}
