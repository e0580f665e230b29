use crate::Error;

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;

use async_nats::jetstream::AckKind;
use async_nats::jetstream::Message as NatsMessage;
use async_nats::jetstream::consumer::Consumer as NatsConsumerType;
use async_nats::jetstream::consumer::pull::{Config as NatsConsumerConfig, Stream as NatsMessages};
use async_trait::async_trait;
use courier_broker::{AckError, Acker, Delivery, DeliveryInfo, PullConsumer, Subscription};
use futures::StreamExt;
use tracing::trace;

use crate::headers::flatten_headers;

/// Acknowledges a JetStream message.
#[derive(Debug)]
pub struct NatsAcker {
    message: NatsMessage,
}

#[async_trait]
impl Acker for NatsAcker {
    async fn ack(&self) -> Result<(), AckError> {
        self.message.ack().await
    }

    async fn nak(&self, delay: Option<Duration>) -> Result<(), AckError> {
        self.message.ack_with(AckKind::Nak(delay)).await
    }
}

pub fn into_delivery(message: NatsMessage) -> Delivery {
    let info = message
        .info()
        .map(|info| DeliveryInfo {
            stream_sequence: info.stream_sequence,
            consumer_sequence: info.consumer_sequence,
            delivered: u64::try_from(info.delivered).unwrap_or_default(),
            pending: info.pending,
        })
        .unwrap_or_default();

    Delivery::new(
        message.subject.to_string(),
        message.payload.clone(),
        flatten_headers(message.headers.as_ref()),
        info,
        Box::new(NatsAcker { message }),
    )
}

/// Pull handle on a durable JetStream consumer.
#[derive(Debug)]
pub struct NatsPullConsumer {
    durable: String,
    nats_consumer: NatsConsumerType<NatsConsumerConfig>,
}

impl NatsPullConsumer {
    pub(crate) const fn new(
        durable: String,
        nats_consumer: NatsConsumerType<NatsConsumerConfig>,
    ) -> Self {
        Self {
            durable,
            nats_consumer,
        }
    }

    pub(crate) fn into_inner(self) -> NatsConsumerType<NatsConsumerConfig> {
        self.nats_consumer
    }
}

#[async_trait]
impl PullConsumer for NatsPullConsumer {
    type Error = Error;

    async fn fetch(
        &mut self,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<Delivery>, Self::Error> {
        let mut batch = self
            .nats_consumer
            .batch()
            .max_messages(max_messages.max(1))
            .expires(expires)
            .messages()
            .await
            .map_err(|e| Error::Fetch(e.kind()))?;

        let mut deliveries = Vec::with_capacity(max_messages);
        while let Some(message) = batch.next().await {
            let message = message.map_err(|e| Error::FetchMessage(e.to_string()))?;
            deliveries.push(into_delivery(message));
        }

        trace!(durable = %self.durable, count = deliveries.len(), "fetched batch");

        Ok(deliveries)
    }

    async fn unsubscribe(self) -> Result<(), Self::Error> {
        trace!(durable = %self.durable, "detached from consumer");

        Ok(())
    }
}

/// Continuous feed over a durable JetStream consumer.
pub struct NatsSubscription {
    durable: String,
    messages: NatsMessages,
}

impl NatsSubscription {
    pub(crate) const fn new(durable: String, messages: NatsMessages) -> Self {
        Self { durable, messages }
    }
}

impl Debug for NatsSubscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("NatsSubscription")
            .field("durable", &self.durable)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Subscription for NatsSubscription {
    type Error = Error;

    async fn next(&mut self) -> Option<Result<Delivery, Self::Error>> {
        self.messages.next().await.map(|message| {
            message
                .map(into_delivery)
                .map_err(|e| Error::Messages(e.kind()))
        })
    }

    async fn unsubscribe(self) -> Result<(), Self::Error> {
        trace!(durable = %self.durable, "detached from consumer");

        Ok(())
    }
}
