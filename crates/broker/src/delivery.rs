use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use courier_codec::Codec;
use serde::de::DeserializeOwned;

/// Message headers, flattened to their first value.
pub type Headers = HashMap<String, String>;

/// Error returned by acknowledgement round-trips.
pub type AckError = Box<dyn StdError + Send + Sync>;

/// Sends acknowledgements for one delivered message back to the broker.
#[async_trait]
pub trait Acker
where
    Self: Debug + Send + Sync + 'static,
{
    /// Acknowledges the message; it will not be delivered to this durable again.
    async fn ack(&self) -> Result<(), AckError>;

    /// Negatively acknowledges the message, asking for redelivery after `delay`
    /// (immediately when `None`).
    async fn nak(&self, delay: Option<Duration>) -> Result<(), AckError>;
}

/// Delivery metadata attached by the broker.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DeliveryInfo {
    /// Position of the message in its stream.
    pub stream_sequence: u64,

    /// Position of this delivery in the consumer's delivery sequence.
    pub consumer_sequence: u64,

    /// How many times this message has been delivered, including this time.
    pub delivered: u64,

    /// Messages still pending for the consumer after this one.
    pub pending: u64,
}

/// A message handed out by a consumer, acknowledgeable exactly as the broker
/// delivered it.
#[derive(Debug)]
pub struct Delivery {
    subject: String,
    payload: Bytes,
    headers: Headers,
    info: DeliveryInfo,
    acker: Box<dyn Acker>,
}

impl Delivery {
    /// Assembles a delivery. Called by transports.
    #[must_use]
    pub fn new(
        subject: String,
        payload: Bytes,
        headers: Headers,
        info: DeliveryInfo,
        acker: Box<dyn Acker>,
    ) -> Self {
        Self {
            subject,
            payload,
            headers,
            info,
            acker,
        }
    }

    /// The concrete subject the message was published on.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The raw payload.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// All headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// A single header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Broker metadata for this delivery.
    #[must_use]
    pub const fn info(&self) -> DeliveryInfo {
        self.info
    }

    /// Decodes the payload with the given codec.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the payload is malformed for `T`.
    pub fn decode<T, C>(&self, codec: &C) -> Result<T, courier_codec::Error>
    where
        T: DeserializeOwned,
        C: Codec,
    {
        codec.decode(&self.payload)
    }

    /// Acknowledges the message.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the acknowledgement could not be sent.
    pub async fn ack(&self) -> Result<(), AckError> {
        self.acker.ack().await
    }

    /// Asks the broker to redeliver the message, optionally after `delay`.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the request could not be sent.
    pub async fn nak(&self, delay: Option<Duration>) -> Result<(), AckError> {
        self.acker.nak(delay).await
    }
}

/// A message read back directly from a stream (no consumer involved).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredMessage {
    /// Subject the message was published on.
    pub subject: String,

    /// Stream sequence.
    pub sequence: u64,

    /// Raw payload.
    pub payload: Bytes,

    /// Headers, flattened to their first value.
    pub headers: Headers,
}
