use courier_broker::{BrokerError, ErrorKind, SpecError};
use thiserror::Error;

/// Errors that can occur in the in-memory broker.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The connection was closed.
    #[error("connection closed")]
    Closed,

    /// The durable consumer vanished while a handle was still in use.
    #[error("consumer '{durable}' not found on stream '{stream}'")]
    ConsumerNotFound {
        /// Stream the consumer was bound to.
        stream: String,
        /// Durable name.
        durable: String,
    },

    /// The stream or consumer spec was rejected.
    #[error(transparent)]
    InvalidSpec(#[from] SpecError),

    /// The subject cannot be published to.
    #[error("invalid publish subject '{0}'")]
    InvalidSubject(String),

    /// No stream captures the subject.
    #[error("no stream captures subject '{0}'")]
    NoStream(String),

    /// A stream with that name already exists.
    #[error("stream '{0}' already exists")]
    StreamExists(String),

    /// No stream with that name exists.
    #[error("stream '{0}' not found")]
    StreamNotFound(String),

    /// The new stream's subjects overlap an existing stream.
    #[error("subjects of stream '{stream}' overlap stream '{existing}'")]
    SubjectsOverlap {
        /// The stream being created.
        stream: String,
        /// The stream already capturing some of the subjects.
        existing: String,
    },

    /// None of the servers is running.
    #[error("no memory server running at any of: {0}")]
    Unreachable(String),
}

impl BrokerError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Closed => ErrorKind::Closed,
            Self::ConsumerNotFound { .. } | Self::NoStream(_) | Self::StreamNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::StreamExists(_) => ErrorKind::AlreadyExists,
            Self::Unreachable(_) => ErrorKind::Unreachable,
            Self::InvalidSpec(_) | Self::InvalidSubject(_) | Self::SubjectsOverlap { .. } => {
                ErrorKind::Other
            }
        }
    }
}
