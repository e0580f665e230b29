use crate::Error;
use crate::server::ServerState;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use courier_broker::{AckError, Acker, Delivery, PullConsumer, Subscription};
use tokio::time::{Instant, timeout_at};
use tracing::trace;

/// How long a [`MemorySubscription`] waits per internal fetch.
const SUBSCRIPTION_POLL: Duration = Duration::from_secs(1);

/// Acknowledges one message of one durable consumer.
#[derive(Debug)]
pub struct MemoryAcker {
    server: Arc<ServerState>,
    stream: String,
    durable: String,
    sequence: u64,
}

impl MemoryAcker {
    pub(crate) const fn new(
        server: Arc<ServerState>,
        stream: String,
        durable: String,
        sequence: u64,
    ) -> Self {
        Self {
            server,
            stream,
            durable,
            sequence,
        }
    }
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self) -> Result<(), AckError> {
        self.server.ack(&self.stream, &self.durable, self.sequence);

        Ok(())
    }

    async fn nak(&self, delay: Option<Duration>) -> Result<(), AckError> {
        self.server
            .nak(&self.stream, &self.durable, self.sequence, delay);

        Ok(())
    }
}

/// Pull handle on a durable consumer of a memory server.
#[derive(Debug)]
pub struct MemoryPullConsumer {
    server: Arc<ServerState>,
    closed: Arc<AtomicBool>,
    stream: String,
    durable: String,
}

impl MemoryPullConsumer {
    pub(crate) const fn new(
        server: Arc<ServerState>,
        closed: Arc<AtomicBool>,
        stream: String,
        durable: String,
    ) -> Self {
        Self {
            server,
            closed,
            stream,
            durable,
        }
    }
}

#[async_trait]
impl PullConsumer for MemoryPullConsumer {
    type Error = Error;

    async fn fetch(
        &mut self,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<Delivery>, Self::Error> {
        let deadline = Instant::now() + expires;
        let mut activity = self.server.subscribe_activity();

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::Closed);
            }

            let batch = self
                .server
                .take_batch(&self.stream, &self.durable, max_messages.max(1))?;

            if !batch.deliveries.is_empty() {
                trace!(
                    durable = %self.durable,
                    count = batch.deliveries.len(),
                    "fetched batch"
                );
                return Ok(batch.deliveries);
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            let wake = batch
                .next_redelivery
                .map_or(deadline, |at| at.min(deadline));

            // Elapsed and changed are both just reasons to look again.
            let _ = timeout_at(wake, activity.changed()).await;
        }
    }

    async fn unsubscribe(self) -> Result<(), Self::Error> {
        trace!(durable = %self.durable, "detached from consumer");

        Ok(())
    }
}

/// Continuous feed over a durable consumer, one delivery at a time.
#[derive(Debug)]
pub struct MemorySubscription {
    consumer: MemoryPullConsumer,
}

impl MemorySubscription {
    pub(crate) const fn new(consumer: MemoryPullConsumer) -> Self {
        Self { consumer }
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    type Error = Error;

    async fn next(&mut self) -> Option<Result<Delivery, Self::Error>> {
        loop {
            match self.consumer.fetch(1, SUBSCRIPTION_POLL).await {
                Ok(mut batch) => {
                    if let Some(delivery) = batch.pop() {
                        return Some(Ok(delivery));
                    }
                }
                Err(Error::Closed) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }

    async fn unsubscribe(self) -> Result<(), Self::Error> {
        self.consumer.unsubscribe().await
    }
}
