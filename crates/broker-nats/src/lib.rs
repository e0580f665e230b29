//! NATS JetStream implementation of the broker contract.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod consumer;
mod error;
mod headers;

pub use consumer::{NatsAcker, NatsPullConsumer, NatsSubscription};
pub use error::Error;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_nats::jetstream::Context;
use async_nats::jetstream::consumer::pull::Config as NatsConsumerConfig;
use async_nats::jetstream::consumer::{
    AckPolicy as NatsAckPolicy, DeliverPolicy as NatsDeliverPolicy,
};
use async_nats::jetstream::stream::{Config as NatsStreamConfig, Info as NatsStreamInfo, StorageType};
use async_nats::{Client, ConnectOptions, ServerAddr};
use async_trait::async_trait;
use bytes::Bytes;
use courier_broker::{
    AckPolicy, Broker, BrokerError, BrokerOptions, ConsumerSpec, DeliverPolicy, ErrorKind,
    Headers, StorageKind, StoredMessage, StreamInfo, StreamSpec,
};
use tracing::{debug, info};

use crate::headers::{flatten_headers, to_header_map};

/// Options for [`NatsBroker`].
#[derive(Clone, Debug)]
pub struct NatsBrokerOptions {
    /// Timeout for establishing the TCP connection and handshake.
    pub connection_timeout: Duration,

    /// Client name reported to the server.
    pub name: Option<String>,
}

impl Default for NatsBrokerOptions {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(5),
            name: None,
        }
    }
}

impl BrokerOptions for NatsBrokerOptions {}

/// A connection to a NATS server with JetStream enabled.
#[derive(Clone, Debug)]
pub struct NatsBroker {
    closed: Arc<AtomicBool>,
    jetstream_context: Context,
    nats_client: Client,
}

impl NatsBroker {
    /// The underlying NATS client.
    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.nats_client
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        Ok(())
    }

    async fn stream_for_subject(&self, subject: &str) -> Result<String, Error> {
        self.jetstream_context
            .stream_by_subject(subject)
            .await
            .map_err(|e| Error::StreamLookup(e.kind()))
    }
}

fn stream_config(spec: &StreamSpec) -> NatsStreamConfig {
    NatsStreamConfig {
        name: spec.name().to_string(),
        subjects: spec.subjects().to_vec(),
        storage: match spec.storage() {
            StorageKind::File => StorageType::File,
            StorageKind::Memory => StorageType::Memory,
        },
        max_messages_per_subject: spec.max_messages_per_subject().unwrap_or(-1),
        allow_direct: spec.max_messages_per_subject().is_some(),
        allow_rollup: spec.max_messages_per_subject().is_some(),
        ..Default::default()
    }
}

fn to_stream_info(info: &NatsStreamInfo) -> StreamInfo {
    StreamInfo {
        name: info.config.name.clone(),
        subjects: info.config.subjects.clone(),
        messages: info.state.messages,
        last_sequence: info.state.last_sequence,
    }
}

fn consumer_config(spec: &ConsumerSpec) -> NatsConsumerConfig {
    NatsConsumerConfig {
        durable_name: Some(spec.durable_name().to_string()),
        filter_subject: spec.subject().to_string(),
        ack_policy: match spec.ack_policy() {
            AckPolicy::Explicit => NatsAckPolicy::Explicit,
            AckPolicy::None => NatsAckPolicy::None,
        },
        deliver_policy: match spec.deliver_policy() {
            DeliverPolicy::All => NatsDeliverPolicy::All,
            DeliverPolicy::New => NatsDeliverPolicy::New,
        },
        ack_wait: spec.ack_wait(),
        max_deliver: spec.max_deliver().unwrap_or_default(),
        ..Default::default()
    }
}

fn parse_servers(servers: &[String]) -> Result<Vec<ServerAddr>, Error> {
    if servers.is_empty() {
        return Err(Error::NoServers);
    }

    servers
        .iter()
        .map(|server| {
            server
                .parse::<ServerAddr>()
                .map_err(|e| Error::InvalidServer {
                    server: server.clone(),
                    reason: e.to_string(),
                })
        })
        .collect()
}

#[async_trait]
impl Broker for NatsBroker {
    type Error = Error;
    type Options = NatsBrokerOptions;
    type PullConsumer = NatsPullConsumer;
    type Subscription = NatsSubscription;

    async fn connect(servers: &[String], options: Self::Options) -> Result<Self, Self::Error> {
        let addrs = parse_servers(servers)?;

        let mut connect_options =
            ConnectOptions::new().connection_timeout(options.connection_timeout);
        if let Some(name) = options.name {
            connect_options = connect_options.name(name);
        }

        let nats_client = connect_options
            .connect(addrs.as_slice())
            .await
            .map_err(|e| Error::Connect(e.kind()))?;
        let jetstream_context = async_nats::jetstream::new(nats_client.clone());

        info!(servers = ?servers, "connected to nats");

        Ok(Self {
            closed: Arc::new(AtomicBool::new(false)),
            jetstream_context,
            nats_client,
        })
    }

    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        headers: Option<Headers>,
    ) -> Result<u64, Self::Error> {
        self.ensure_open()?;

        let subject = subject.to_string();
        let ack_future = match headers {
            Some(headers) => {
                self.jetstream_context
                    .publish_with_headers(subject, to_header_map(&headers), payload)
                    .await
            }
            None => self.jetstream_context.publish(subject, payload).await,
        }
        .map_err(|e| Error::Publish(e.kind()))?;

        let ack = ack_future.await.map_err(|e| Error::Publish(e.kind()))?;

        Ok(ack.sequence)
    }

    async fn stream_info(&self, name: &str) -> Result<Option<StreamInfo>, Self::Error> {
        self.ensure_open()?;

        match self.jetstream_context.get_stream(name).await {
            Ok(stream) => Ok(Some(to_stream_info(stream.cached_info()))),
            Err(e) => {
                let error = Error::StreamInfo(e.kind());

                if error.kind() == ErrorKind::NotFound {
                    Ok(None)
                } else {
                    Err(error)
                }
            }
        }
    }

    async fn add_stream(&self, spec: &StreamSpec) -> Result<StreamInfo, Self::Error> {
        self.ensure_open()?;
        spec.validate()?;

        if self.stream_info(spec.name()).await?.is_some() {
            return Err(Error::StreamExists(spec.name().to_string()));
        }

        let stream = self
            .jetstream_context
            .create_stream(stream_config(spec))
            .await
            .map_err(|e| Error::StreamCreate(e.kind()))?;

        debug!(stream = %spec.name(), subjects = ?spec.subjects(), "stream created");

        Ok(to_stream_info(stream.cached_info()))
    }

    async fn last_message(
        &self,
        stream: &str,
        subject: &str,
    ) -> Result<Option<StoredMessage>, Self::Error> {
        self.ensure_open()?;

        let stream = self
            .jetstream_context
            .get_stream(stream)
            .await
            .map_err(|e| Error::StreamInfo(e.kind()))?;

        match stream.get_last_raw_message_by_subject(subject).await {
            Ok(message) => Ok(Some(StoredMessage {
                subject: message.subject.to_string(),
                sequence: message.sequence,
                payload: message.payload.clone(),
                headers: flatten_headers(Some(&message.headers)),
            })),
            Err(e) => match e.kind() {
                async_nats::jetstream::stream::LastRawMessageErrorKind::NoMessageFound => Ok(None),
                kind => Err(Error::LastMessage(kind)),
            },
        }
    }

    async fn pull_subscribe(&self, spec: &ConsumerSpec) -> Result<Self::PullConsumer, Self::Error> {
        self.ensure_open()?;
        spec.validate()?;

        let stream_name = self.stream_for_subject(spec.subject()).await?;
        let stream = self
            .jetstream_context
            .get_stream(&stream_name)
            .await
            .map_err(|e| Error::StreamInfo(e.kind()))?;

        let nats_consumer = stream
            .get_or_create_consumer(spec.durable_name(), consumer_config(spec))
            .await
            .map_err(|e| Error::ConsumerCreate(e.kind()))?;

        debug!(stream = %stream_name, durable = %spec.durable_name(), "bound durable consumer");

        Ok(NatsPullConsumer::new(
            spec.durable_name().to_string(),
            nats_consumer,
        ))
    }

    async fn subscribe(&self, spec: &ConsumerSpec) -> Result<Self::Subscription, Self::Error> {
        let consumer = self.pull_subscribe(spec).await?;
        let messages = consumer
            .into_inner()
            .messages()
            .await
            .map_err(|e| Error::ConsumerStream(e.kind()))?;

        Ok(NatsSubscription::new(
            spec.durable_name().to_string(),
            messages,
        ))
    }

    async fn close(&self) -> Result<(), Self::Error> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Drains subscriptions, flushes, then ends the connection task.
        self.nats_client.drain().await.map_err(Error::Drain)?;

        info!("nats connection closed");

        Ok(())
    }
}
