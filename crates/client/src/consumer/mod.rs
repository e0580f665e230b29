mod error;

pub use error::Error;

use crate::config::{PollOptions, SupervisorConfig};
use crate::connection::Connection;
use crate::registry::{TaskError, TaskHandle, TaskKind, TaskOutcome};

use std::error::Error as StdError;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use courier_broker::{Broker, BrokerError, ConsumerSpec, Delivery, ErrorKind, PullConsumer};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Marker trait for consumer handler errors.
pub trait ConsumerHandlerError: StdError + Send + Sync + 'static {}

/// Application callback invoked for every delivered message.
///
/// The supervisor never acknowledges on the handler's behalf: call
/// [`Delivery::ack`] once the message is processed. Returning an error stops
/// the consumer task and leaves the message to be redelivered after `ack_wait`.
#[async_trait]
pub trait ConsumerHandler
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the handler.
    type Error: ConsumerHandlerError;

    /// Handles one delivery.
    async fn handle(&self, delivery: Delivery) -> Result<(), Self::Error>;
}

/// Runs one polling task per durable pull consumer.
#[derive(Debug)]
pub struct ConsumerSupervisor<B>
where
    B: Broker,
{
    config: SupervisorConfig,
    connection: Connection<B>,
}

impl<B> Clone for ConsumerSupervisor<B>
where
    B: Broker,
{
    fn clone(&self) -> Self {
        Self {
            config: self.config,
            connection: self.connection.clone(),
        }
    }
}

impl<B> ConsumerSupervisor<B>
where
    B: Broker,
{
    /// Creates a supervisor on `connection`.
    #[must_use]
    pub fn new(connection: &Connection<B>, config: SupervisorConfig) -> Self {
        Self {
            config,
            connection: connection.clone(),
        }
    }

    /// Starts an explicit-ack consumer on `subject` that replays the whole
    /// stream, identified by `durable_name`.
    ///
    /// Reusing a durable name resumes its position; two live tasks with the
    /// same name compete for messages.
    ///
    /// # Errors
    ///
    /// Fails if the spec is invalid, the durable consumer cannot be created,
    /// or shutdown has begun.
    pub async fn add_subscription<H>(
        &self,
        subject: &str,
        durable_name: &str,
        handler: H,
        ack_wait: Duration,
    ) -> Result<TaskHandle, Error<B::Error>>
    where
        H: ConsumerHandler,
    {
        let spec = ConsumerSpec::new(subject, durable_name).with_ack_wait(ack_wait);

        self.add_subscription_with(spec, handler, self.config.poll)
            .await
    }

    /// Starts a consumer from a full spec with its own poll settings.
    ///
    /// # Errors
    ///
    /// Same as [`Self::add_subscription`].
    pub async fn add_subscription_with<H>(
        &self,
        spec: ConsumerSpec,
        handler: H,
        poll: PollOptions,
    ) -> Result<TaskHandle, Error<B::Error>>
    where
        H: ConsumerHandler,
    {
        spec.validate()?;

        if self.connection.is_closed() {
            return Err(Error::Closed);
        }

        if self.connection.registry().is_closed() {
            return Err(Error::ShuttingDown);
        }

        let durable = spec.durable_name().to_string();
        let consumer = self
            .connection
            .broker()
            .pull_subscribe(&spec)
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::Closed {
                    Error::Closed
                } else {
                    Error::Subscribe {
                        durable: durable.clone(),
                        source: e,
                    }
                }
            })?;

        info!(
            subject = %spec.subject(),
            durable = %durable,
            ack_wait = ?spec.ack_wait(),
            "consumer subscribed"
        );

        self.connection
            .registry()
            .spawn(
                format!("consumer:{durable}"),
                TaskKind::Consumer,
                move |token| poll_loop(consumer, handler, poll, durable, token),
            )
            .map_err(|_| Error::ShuttingDown)
    }

    /// Cancels one task and waits for it, aborting it after the grace period.
    ///
    /// The durable position stays on the broker. Returns `None` if the task is
    /// no longer registered.
    pub async fn cancel(&self, handle: &TaskHandle) -> Option<TaskOutcome> {
        let deadline = Instant::now() + self.config.grace_period;

        self.connection
            .registry()
            .cancel(handle.id(), deadline)
            .await
            .map(|report| report.outcome)
    }
}

async fn poll_loop<C, H>(
    mut consumer: C,
    handler: H,
    poll: PollOptions,
    durable: String,
    token: CancellationToken,
) -> Result<(), TaskError>
where
    C: PullConsumer,
    H: ConsumerHandler,
{
    let result = run(&mut consumer, &handler, poll, &durable, &token).await;

    if let Err(e) = consumer.unsubscribe().await {
        warn!(%durable, error = %e, "failed to unsubscribe consumer");
    }

    match result {
        Ok(()) => {
            debug!(%durable, "consumer loop exited");
            Ok(())
        }
        Err(e) => {
            error!(%durable, error = %e, "consumer task terminated");
            Err(Box::new(e))
        }
    }
}

async fn run<C, H>(
    consumer: &mut C,
    handler: &H,
    poll: PollOptions,
    durable: &str,
    token: &CancellationToken,
) -> Result<(), Error<C::Error>>
where
    C: PullConsumer,
    H: ConsumerHandler,
{
    loop {
        let fetched = tokio::select! {
            biased;
            () = token.cancelled() => return Ok(()),
            fetched = consumer.fetch(poll.batch_size, poll.fetch_timeout) => fetched,
        };

        let batch = match fetched {
            Ok(batch) => batch,
            Err(e) if e.is_timeout() => Vec::new(),
            Err(e) => {
                return Err(Error::Fetch {
                    durable: durable.to_string(),
                    source: e,
                });
            }
        };

        if batch.is_empty() {
            trace!(%durable, "no messages");

            tokio::select! {
                biased;
                () = token.cancelled() => return Ok(()),
                () = sleep(poll.idle_backoff) => continue,
            }
        }

        for delivery in batch {
            // Undelivered messages of the batch stay unacknowledged and come back.
            if token.is_cancelled() {
                return Ok(());
            }

            trace!(
                %durable,
                subject = %delivery.subject(),
                stream_sequence = delivery.info().stream_sequence,
                delivered = delivery.info().delivered,
                "dispatching message"
            );

            handler
                .handle(delivery)
                .await
                .map_err(|e| Error::Handler {
                    durable: durable.to_string(),
                    source: Box::new(e),
                })?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use bytes::Bytes;
    use courier_broker::StreamSpec;
    use courier_broker_memory::{MemoryBroker, MemoryBrokerOptions, MemoryServer};
    use thiserror::Error as ThisError;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[derive(Debug, ThisError)]
    #[error("rejected")]
    struct Rejected;

    impl ConsumerHandlerError for Rejected {}

    #[derive(Clone, Debug)]
    struct Forward {
        ack: bool,
        fail_on: Option<Bytes>,
        sender: mpsc::UnboundedSender<Bytes>,
    }

    #[async_trait]
    impl ConsumerHandler for Forward {
        type Error = Rejected;

        async fn handle(&self, delivery: Delivery) -> Result<(), Self::Error> {
            if self.fail_on.as_ref() == Some(delivery.payload()) {
                return Err(Rejected);
            }

            let _ = self.sender.send(delivery.payload().clone());

            if self.ack {
                delivery.ack().await.map_err(|_| Rejected)?;
            }

            Ok(())
        }
    }

    fn fast_poll() -> PollOptions {
        PollOptions {
            batch_size: 1,
            fetch_timeout: Duration::from_millis(50),
            idle_backoff: Duration::from_millis(10),
        }
    }

    async fn setup() -> (Connection<MemoryBroker>, ConsumerSupervisor<MemoryBroker>) {
        let server = MemoryServer::start(format!("memory://{}", uuid::Uuid::new_v4()));
        let broker = MemoryBroker::connect(&[server.address().to_string()], MemoryBrokerOptions)
            .await
            .unwrap();
        broker
            .add_stream(&StreamSpec::new("orders", ["orders"]))
            .await
            .unwrap();

        let connection = Connection::new(broker);
        let supervisor = ConsumerSupervisor::new(
            &connection,
            SupervisorConfig {
                poll: fast_poll(),
                grace_period: Duration::from_secs(1),
            },
        );

        (connection, supervisor)
    }

    #[tokio::test]
    async fn test_handler_error_terminates_task() {
        let (connection, supervisor) = setup().await;
        let (sender, _receiver) = mpsc::unbounded_channel();

        connection
            .broker()
            .publish("orders", Bytes::from("poison"), None)
            .await
            .unwrap();

        let handle = supervisor
            .add_subscription(
                "orders",
                "worker",
                Forward {
                    ack: true,
                    fail_on: Some(Bytes::from("poison")),
                    sender,
                },
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let outcome = supervisor.cancel(&handle).await.unwrap();

        assert_matches!(outcome, TaskOutcome::Failed(reason) if reason.contains("rejected"));
    }

    #[tokio::test]
    async fn test_cancel_is_observed_while_idle() {
        let (connection, supervisor) = setup().await;
        let (sender, _receiver) = mpsc::unbounded_channel();

        let handle = supervisor
            .add_subscription_with(
                ConsumerSpec::new("orders", "idle"),
                Forward {
                    ack: true,
                    fail_on: None,
                    sender,
                },
                PollOptions {
                    batch_size: 1,
                    fetch_timeout: Duration::from_secs(30),
                    idle_backoff: Duration::from_secs(30),
                },
            )
            .await
            .unwrap();
        assert_eq!(connection.task_count(), 1);

        let outcome = timeout(Duration::from_secs(2), supervisor.cancel(&handle))
            .await
            .unwrap();

        assert_eq!(outcome, Some(TaskOutcome::Completed));
        assert_eq!(connection.task_count(), 0);
        assert_eq!(supervisor.cancel(&handle).await, None);
    }

    #[tokio::test]
    async fn test_batch_delivers_in_order() {
        let (connection, supervisor) = setup().await;
        let (sender, mut receiver) = mpsc::unbounded_channel();

        for text in ["m1", "m2", "m3"] {
            connection
                .broker()
                .publish("orders", Bytes::from(text), None)
                .await
                .unwrap();
        }

        supervisor
            .add_subscription_with(
                ConsumerSpec::new("orders", "batched"),
                Forward {
                    ack: true,
                    fail_on: None,
                    sender,
                },
                PollOptions {
                    batch_size: 10,
                    ..fast_poll()
                },
            )
            .await
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(
                timeout(Duration::from_secs(2), receiver.recv())
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }

        assert_eq!(seen, vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_invalid_durable_is_rejected_before_subscribing() {
        let (_connection, supervisor) = setup().await;
        let (sender, _receiver) = mpsc::unbounded_channel();

        let result = supervisor
            .add_subscription(
                "orders",
                "bad durable",
                Forward {
                    ack: true,
                    fail_on: None,
                    sender,
                },
                Duration::from_secs(30),
            )
            .await;

        assert_matches!(result, Err(Error::InvalidSpec(_)));
    }

    #[tokio::test]
    async fn test_missing_stream_is_subscribe_error() {
        let (_connection, supervisor) = setup().await;
        let (sender, _receiver) = mpsc::unbounded_channel();

        let result = supervisor
            .add_subscription(
                "payments",
                "worker",
                Forward {
                    ack: true,
                    fail_on: None,
                    sender,
                },
                Duration::from_secs(30),
            )
            .await;

        assert_matches!(result, Err(Error::Subscribe { ref durable, .. }) if durable == "worker");
    }

    #[tokio::test]
    async fn test_closed_connection_fails_fetch_task() {
        let (connection, supervisor) = setup().await;
        let (sender, _receiver) = mpsc::unbounded_channel();

        let handle = supervisor
            .add_subscription(
                "orders",
                "worker",
                Forward {
                    ack: true,
                    fail_on: None,
                    sender,
                },
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        connection.broker().close().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let outcome = supervisor.cancel(&handle).await.unwrap();
        assert_matches!(outcome, TaskOutcome::Failed(reason) if reason.contains("fetch failed"));
    }
}
