mod error;

pub use error::Error;

use crate::connection::Connection;

use courier_broker::{Broker, BrokerError, ErrorKind, StreamInfo, StreamSpec};
use tracing::{debug, info, warn};

/// Idempotent stream creation and lookup.
#[derive(Debug)]
pub struct StreamAdmin<B>
where
    B: Broker,
{
    connection: Connection<B>,
}

impl<B> Clone for StreamAdmin<B>
where
    B: Broker,
{
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
        }
    }
}

impl<B> StreamAdmin<B>
where
    B: Broker,
{
    /// Creates an administrator on `connection`.
    #[must_use]
    pub fn new(connection: &Connection<B>) -> Self {
        Self {
            connection: connection.clone(),
        }
    }

    /// Makes sure a stream named `spec.name()` exists, creating it if needed.
    ///
    /// An existing stream is kept as it is, even if its subjects differ from
    /// `spec`. Losing a creation race to another client counts as success.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] for a malformed spec and
    /// [`Error::Admin`] for any other broker failure.
    pub async fn ensure_stream(&self, spec: &StreamSpec) -> Result<StreamInfo, Error<B::Error>> {
        spec.validate()?;

        if let Some(existing) = self.stream_info(spec.name()).await? {
            if existing.subjects != spec.subjects() {
                warn!(
                    stream = %spec.name(),
                    existing = ?existing.subjects,
                    requested = ?spec.subjects(),
                    "stream exists with different subjects, keeping existing"
                );
            }

            debug!(stream = %spec.name(), "stream already exists");
            return Ok(existing);
        }

        match self.connection.broker().add_stream(spec).await {
            Ok(info) => {
                info!(stream = %spec.name(), subjects = ?spec.subjects(), "stream created");
                Ok(info)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(stream = %spec.name(), "stream created concurrently");

                self.stream_info(spec.name())
                    .await?
                    .ok_or_else(|| admin_error(spec.name(), e))
            }
            Err(e) => Err(admin_error(spec.name(), e)),
        }
    }

    /// Looks a stream up by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Admin`] if the broker lookup fails.
    pub async fn stream_info(&self, name: &str) -> Result<Option<StreamInfo>, Error<B::Error>> {
        if self.connection.is_closed() {
            return Err(Error::Closed);
        }

        self.connection
            .broker()
            .stream_info(name)
            .await
            .map_err(|e| admin_error(name, e))
    }
}

fn admin_error<BE>(stream: &str, source: BE) -> Error<BE>
where
    BE: BrokerError,
{
    if source.kind() == ErrorKind::Closed {
        return Error::Closed;
    }

    Error::Admin {
        stream: stream.to_string(),
        source,
    }
}
