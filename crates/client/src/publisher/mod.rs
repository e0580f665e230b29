mod error;

pub use error::Error;

use crate::connection::Connection;

use std::fmt::Debug;

use courier_broker::subject::is_valid_subject;
use courier_broker::{Broker, BrokerError, ErrorKind, Headers};
use courier_codec::Codec;
use serde::Serialize;
use tracing::debug;

/// Encodes values and publishes them to stream subjects.
#[derive(Debug)]
pub struct Publisher<B, C>
where
    B: Broker,
    C: Codec,
{
    codec: C,
    connection: Connection<B>,
}

impl<B, C> Clone for Publisher<B, C>
where
    B: Broker,
    C: Codec,
{
    fn clone(&self) -> Self {
        Self {
            codec: self.codec.clone(),
            connection: self.connection.clone(),
        }
    }
}

impl<B, C> Publisher<B, C>
where
    B: Broker,
    C: Codec,
{
    /// Creates a publisher on `connection` encoding with `codec`.
    #[must_use]
    pub fn new(connection: &Connection<B>, codec: C) -> Self {
        Self {
            codec,
            connection: connection.clone(),
        }
    }

    /// Publishes `value` and waits for the stream to persist it, returning its
    /// stream sequence.
    ///
    /// # Errors
    ///
    /// Fails if the subject is invalid, the value cannot be encoded, or no
    /// stream accepts the message.
    pub async fn publish<T>(&self, subject: &str, value: &T) -> Result<u64, Error<B::Error>>
    where
        T: Debug + Serialize + ?Sized,
    {
        self.publish_with_headers(subject, value, Headers::new())
            .await
    }

    /// Publishes `value` with headers.
    ///
    /// # Errors
    ///
    /// Same as [`Self::publish`].
    pub async fn publish_with_headers<T>(
        &self,
        subject: &str,
        value: &T,
        headers: Headers,
    ) -> Result<u64, Error<B::Error>>
    where
        T: Debug + Serialize + ?Sized,
    {
        if self.connection.is_closed() {
            return Err(Error::Closed);
        }

        if !is_valid_subject(subject) {
            return Err(Error::InvalidSubject(subject.to_string()));
        }

        let payload = self.codec.encode(value).map_err(Error::Encode)?;
        let headers = (!headers.is_empty()).then_some(headers);

        let sequence = self
            .connection
            .broker()
            .publish(subject, payload, headers)
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::Closed {
                    Error::Closed
                } else {
                    Error::Broker {
                        subject: subject.to_string(),
                        source: e,
                    }
                }
            })?;
        debug!(%subject, ?value, sequence, "published");

        Ok(sequence)
    }
}
