use courier_broker::BrokerError;
use thiserror::Error;

/// Errors that can occur publishing to a stream subject.
#[derive(Debug, Error)]
pub enum Error<BE>
where
    BE: BrokerError,
{
    /// The broker rejected the publish, e.g. no stream captures the subject.
    #[error("failed to publish to '{subject}': {source}")]
    Broker {
        /// Subject.
        subject: String,
        /// Broker error.
        source: BE,
    },

    /// The connection has been closed.
    #[error("connection is closed")]
    Closed,

    /// The value could not be encoded.
    #[error(transparent)]
    Encode(courier_codec::Error),

    /// The subject is empty or contains wildcards.
    #[error("invalid subject '{0}'")]
    InvalidSubject(String),
}
