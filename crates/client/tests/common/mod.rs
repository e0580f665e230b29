#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use courier_broker_memory::{MemoryBroker, MemoryBrokerOptions, MemoryServer};
use courier_client::{
    Broker, ConnectConfig, Connection, ConnectionManager, ConsumerHandler, ConsumerHandlerError,
    Delivery, PollOptions, ShutdownConfig, StreamAdmin, StreamSpec, SupervisorConfig,
};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout};

/// A fresh in-process server with a managed connection and a second raw
/// connection used to publish test traffic.
pub struct TestBroker {
    pub server: MemoryServer,
    pub manager: ConnectionManager<MemoryBroker>,
    pub connection: Connection<MemoryBroker>,
    pub publisher: MemoryBroker,
}

impl TestBroker {
    pub async fn start() -> Self {
        let server = MemoryServer::start(format!("memory://{}", uuid::Uuid::new_v4()));
        let manager = ConnectionManager::<MemoryBroker>::connect(
            ConnectConfig::new([server.address()]),
            MemoryBrokerOptions,
        )
        .await
        .expect("Failed to connect")
        .with_shutdown_config(ShutdownConfig {
            grace_period: Duration::from_secs(3),
        });
        let publisher = MemoryBroker::connect(&[server.address().to_string()], MemoryBrokerOptions)
            .await
            .expect("Failed to connect publisher");

        Self {
            connection: manager.connection(),
            server,
            manager,
            publisher,
        }
    }

    pub async fn with_stream(name: &str, subjects: &[&str]) -> Self {
        let broker = Self::start().await;

        StreamAdmin::new(&broker.connection)
            .ensure_stream(&StreamSpec::new(name, subjects.iter().copied()))
            .await
            .expect("Failed to ensure stream");

        broker
    }

    pub async fn publish_json<T>(&self, subject: &str, value: &T) -> u64
    where
        T: Serialize,
    {
        let payload = serde_json::to_vec(value).expect("Failed to encode");

        self.publisher
            .publish(subject, Bytes::from(payload), None)
            .await
            .expect("Failed to publish")
    }

    pub async fn publish_text(&self, subject: &str, text: &str) -> u64 {
        self.publisher
            .publish(subject, Bytes::copy_from_slice(text.as_bytes()), None)
            .await
            .expect("Failed to publish")
    }
}

pub fn fast_supervisor() -> SupervisorConfig {
    SupervisorConfig {
        poll: PollOptions {
            batch_size: 1,
            fetch_timeout: Duration::from_millis(100),
            idle_backoff: Duration::from_millis(20),
        },
        grace_period: Duration::from_secs(3),
    }
}

pub async fn recv<T>(receiver: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(Duration::from_secs(10), receiver.recv())
        .await
        .expect("Timed out waiting for delivery")
        .expect("Channel closed")
}

pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    timeout(Duration::from_secs(10), async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Timed out waiting for condition");
}

/// What a [`Recorder`] saw for one delivery.
#[derive(Clone, Debug)]
pub struct Received {
    pub text: String,
    pub delivered: u64,
    pub at: Instant,
}

#[derive(Debug, Error)]
#[error("refused to process '{0}'")]
pub struct Refused(pub String);

impl ConsumerHandlerError for Refused {}

/// Records deliveries and acknowledges them, except for texts listed in
/// `skip_first_ack` on their first delivery, and fails on `fail_on`.
#[derive(Clone, Debug)]
pub struct Recorder {
    sender: mpsc::UnboundedSender<Received>,
    skip_first_ack: Arc<Mutex<HashSet<String>>>,
    fail_on: Option<String>,
}

impl Recorder {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Received>) {
        let (sender, receiver) = mpsc::unbounded_channel();

        (
            Self {
                sender,
                skip_first_ack: Arc::new(Mutex::new(HashSet::new())),
                fail_on: None,
            },
            receiver,
        )
    }

    pub fn skipping_first_ack(self, text: &str) -> Self {
        self.skip_first_ack.lock().insert(text.to_string());
        self
    }

    pub fn failing_on(mut self, text: &str) -> Self {
        self.fail_on = Some(text.to_string());
        self
    }
}

#[async_trait]
impl ConsumerHandler for Recorder {
    type Error = Refused;

    async fn handle(&self, delivery: Delivery) -> Result<(), Self::Error> {
        let text = String::from_utf8_lossy(delivery.payload()).into_owned();

        if self.fail_on.as_deref() == Some(text.as_str()) {
            return Err(Refused(text));
        }

        let _ = self.sender.send(Received {
            text: text.clone(),
            delivered: delivery.info().delivered,
            at: Instant::now(),
        });

        let skip_ack = self.skip_first_ack.lock().remove(&text);
        if skip_ack {
            return Ok(());
        }

        delivery
            .ack()
            .await
            .map_err(|_| Refused(text))
    }
}
