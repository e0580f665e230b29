use std::error::Error as StdError;
use std::fmt::{Display, Formatter, Result as FmtResult};

use thiserror::Error;

/// Transport-independent classification of broker failures.
///
/// The orchestration layer only ever branches on these kinds; backends keep
/// their own detailed error types.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// A stream or consumer with that name already exists.
    AlreadyExists,

    /// The handle was used after the connection was closed.
    Closed,

    /// A stream, consumer or message does not exist.
    NotFound,

    /// The request did not complete in time.
    TimedOut,

    /// No server could be reached.
    Unreachable,

    /// Anything else.
    Other,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let kind = match self {
            Self::AlreadyExists => "already exists",
            Self::Closed => "connection closed",
            Self::NotFound => "not found",
            Self::TimedOut => "timed out",
            Self::Unreachable => "unreachable",
            Self::Other => "other",
        };

        f.write_str(kind)
    }
}

/// Marker trait for broker errors, with a classifier the core can branch on.
pub trait BrokerError: StdError + Send + Sync + 'static {
    /// Returns the transport-independent kind of this error.
    fn kind(&self) -> ErrorKind;

    /// Shorthand for `kind() == ErrorKind::TimedOut`.
    fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::TimedOut
    }
}

/// A stream or consumer spec that the broker would reject.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SpecError {
    /// The name is empty or contains characters the broker reserves.
    #[error("invalid {what} name '{name}': must be non-empty and contain no '.', '*', '>' or whitespace")]
    InvalidName {
        /// What was being named (stream, durable consumer).
        what: &'static str,
        /// The rejected name.
        name: String,
    },

    /// A subject is syntactically invalid.
    #[error("invalid subject '{0}'")]
    InvalidSubject(String),

    /// A stream was declared without any subject.
    #[error("stream '{0}' must declare at least one subject")]
    NoSubjects(String),

    /// `ack_wait` must be positive.
    #[error("ack_wait must be greater than zero")]
    ZeroAckWait,
}
