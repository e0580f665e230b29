use async_nats::jetstream::ErrorCode;
use async_nats::jetstream::context::{
    CreateStreamErrorKind, GetStreamByNameErrorKind, GetStreamErrorKind, PublishErrorKind,
};
use async_nats::jetstream::stream::{ConsumerErrorKind, LastRawMessageErrorKind};
use courier_broker::{BrokerError, ErrorKind, SpecError};
use thiserror::Error;

/// Errors that can occur talking to a NATS server.
#[derive(Debug, Error)]
pub enum Error {
    /// The connection was closed.
    #[error("connection closed")]
    Closed,

    /// Connecting failed.
    #[error("Failed to connect: {0}")]
    Connect(async_nats::ConnectErrorKind),

    /// Consumer create error.
    #[error("Failed to create consumer: {0}")]
    ConsumerCreate(ConsumerErrorKind),

    /// Consumer stream error.
    #[error("Consumer stream error: {0}")]
    ConsumerStream(async_nats::jetstream::consumer::StreamErrorKind),

    /// Pull request error.
    #[error("Failed to fetch messages: {0}")]
    Fetch(async_nats::jetstream::consumer::pull::BatchErrorKind),

    /// A message inside a fetched batch could not be read.
    #[error("Failed to read fetched message: {0}")]
    FetchMessage(String),

    /// Draining the connection before close failed.
    #[error("Failed to drain connection: {0}")]
    Drain(async_nats::client::DrainError),

    /// A server address could not be parsed.
    #[error("invalid server address '{server}': {reason}")]
    InvalidServer {
        /// The address as given.
        server: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The stream or consumer spec was rejected.
    #[error(transparent)]
    InvalidSpec(#[from] SpecError),

    /// Last message lookup error.
    #[error("Failed to get last message: {0}")]
    LastMessage(LastRawMessageErrorKind),

    /// Consumer messages error.
    #[error("Failed to get consumer messages: {0}")]
    Messages(async_nats::jetstream::consumer::pull::MessagesErrorKind),

    /// The server list was empty.
    #[error("no servers given")]
    NoServers,

    /// Publish error.
    #[error("Failed to publish: {0}")]
    Publish(PublishErrorKind),

    /// Stream create error.
    #[error("Failed to create stream: {0}")]
    StreamCreate(CreateStreamErrorKind),

    /// A stream with that name already exists.
    #[error("stream '{0}' already exists")]
    StreamExists(String),

    /// Stream info error.
    #[error("Failed to get stream info: {0}")]
    StreamInfo(GetStreamErrorKind),

    /// Looking up the stream capturing a subject failed.
    #[error("Failed to find stream for subject: {0}")]
    StreamLookup(GetStreamByNameErrorKind),
}

impl BrokerError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Closed => ErrorKind::Closed,
            Self::Connect(async_nats::ConnectErrorKind::TimedOut)
            | Self::Publish(PublishErrorKind::TimedOut)
            | Self::ConsumerCreate(ConsumerErrorKind::TimedOut) => ErrorKind::TimedOut,
            Self::Connect(_) | Self::NoServers => ErrorKind::Unreachable,
            Self::Publish(PublishErrorKind::StreamNotFound)
            | Self::StreamLookup(GetStreamByNameErrorKind::NotFound) => ErrorKind::NotFound,
            Self::StreamCreate(CreateStreamErrorKind::JetStream(e))
                if e.error_code() == ErrorCode::STREAM_NAME_EXIST =>
            {
                ErrorKind::AlreadyExists
            }
            Self::StreamExists(_) => ErrorKind::AlreadyExists,
            Self::StreamInfo(GetStreamErrorKind::JetStream(e))
                if e.error_code() == ErrorCode::STREAM_NOT_FOUND =>
            {
                ErrorKind::NotFound
            }
            _ => ErrorKind::Other,
        }
    }
}
