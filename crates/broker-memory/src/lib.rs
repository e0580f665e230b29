//! In-process broker with JetStream semantics, for tests and local runs.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod consumer;
mod error;
mod server;

pub use consumer::{MemoryAcker, MemoryPullConsumer, MemorySubscription};
pub use error::Error;
pub use server::MemoryServer;

use server::ServerState;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use courier_broker::{
    Broker, BrokerOptions, ConsumerSpec, Headers, StoredMessage, StreamInfo, StreamSpec,
};
use tracing::debug;

/// Options for [`MemoryBroker`]. There is nothing to configure.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryBrokerOptions;

impl BrokerOptions for MemoryBrokerOptions {}

/// A client connection to a [`MemoryServer`].
#[derive(Clone, Debug)]
pub struct MemoryBroker {
    address: String,
    closed: Arc<AtomicBool>,
    server: Arc<ServerState>,
}

impl MemoryBroker {
    /// The address of the server this client is connected to.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        Ok(())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    type Error = Error;
    type Options = MemoryBrokerOptions;
    type PullConsumer = MemoryPullConsumer;
    type Subscription = MemorySubscription;

    async fn connect(servers: &[String], _options: Self::Options) -> Result<Self, Self::Error> {
        for address in servers {
            if let Some(server) = MemoryServer::lookup(address) {
                debug!(%address, "connected to memory server");

                return Ok(Self {
                    address: address.clone(),
                    closed: Arc::new(AtomicBool::new(false)),
                    server,
                });
            }
        }

        Err(Error::Unreachable(servers.join(", ")))
    }

    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        headers: Option<Headers>,
    ) -> Result<u64, Self::Error> {
        self.ensure_open()?;

        self.server
            .publish(subject, payload, headers.unwrap_or_default())
    }

    async fn stream_info(&self, name: &str) -> Result<Option<StreamInfo>, Self::Error> {
        self.ensure_open()?;

        Ok(self.server.stream_info(name))
    }

    async fn add_stream(&self, spec: &StreamSpec) -> Result<StreamInfo, Self::Error> {
        self.ensure_open()?;

        self.server.add_stream(spec)
    }

    async fn last_message(
        &self,
        stream: &str,
        subject: &str,
    ) -> Result<Option<StoredMessage>, Self::Error> {
        self.ensure_open()?;

        self.server.last_message(stream, subject)
    }

    async fn pull_subscribe(&self, spec: &ConsumerSpec) -> Result<Self::PullConsumer, Self::Error> {
        self.ensure_open()?;

        let stream = self.server.bind_consumer(spec)?;

        Ok(MemoryPullConsumer::new(
            self.server.clone(),
            self.closed.clone(),
            stream,
            spec.durable_name().to_string(),
        ))
    }

    async fn subscribe(&self, spec: &ConsumerSpec) -> Result<Self::Subscription, Self::Error> {
        let consumer = self.pull_subscribe(spec).await?;

        Ok(MemorySubscription::new(consumer))
    }

    async fn close(&self) -> Result<(), Self::Error> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(address = %self.address, "memory connection closed");
            self.server.notify_activity();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use assert_matches::assert_matches;
    use courier_broker::{
        AckPolicy, BrokerError, DeliverPolicy, ErrorKind, PullConsumer, Subscription,
    };
    use tokio::time::timeout;

    async fn setup(streams: &[StreamSpec]) -> (MemoryServer, MemoryBroker) {
        let server = MemoryServer::start(format!("memory://{}", uuid::Uuid::new_v4()));
        let broker = MemoryBroker::connect(&[server.address().to_string()], MemoryBrokerOptions)
            .await
            .unwrap();

        for spec in streams {
            broker.add_stream(spec).await.unwrap();
        }

        (server, broker)
    }

    fn texts(batch: &[courier_broker::Delivery]) -> Vec<&[u8]> {
        batch.iter().map(|d| d.payload().as_ref()).collect()
    }

    #[tokio::test]
    async fn test_connect_requires_running_server() {
        let result = MemoryBroker::connect(
            &["memory://nobody-home".to_string()],
            MemoryBrokerOptions,
        )
        .await;

        assert_matches!(result, Err(ref e) if e.kind() == ErrorKind::Unreachable);
    }

    #[tokio::test]
    async fn test_connect_skips_unreachable_servers() {
        let server = MemoryServer::start(format!("memory://{}", uuid::Uuid::new_v4()));
        let broker = MemoryBroker::connect(
            &["memory://down".to_string(), server.address().to_string()],
            MemoryBrokerOptions,
        )
        .await
        .unwrap();

        assert_eq!(broker.address(), server.address());
    }

    #[tokio::test]
    async fn test_add_stream_rejects_duplicates_and_overlaps() {
        let (_server, broker) = setup(&[StreamSpec::new("orders", ["orders.>"])]).await;

        let duplicate = broker
            .add_stream(&StreamSpec::new("orders", ["other"]))
            .await;
        assert_matches!(duplicate, Err(ref e) if e.kind() == ErrorKind::AlreadyExists);

        let overlap = broker
            .add_stream(&StreamSpec::new("eu_orders", ["orders.eu"]))
            .await;
        assert_matches!(overlap, Err(Error::SubjectsOverlap { .. }));

        let info = broker.stream_info("orders").await.unwrap().unwrap();
        assert_eq!(info.subjects, vec!["orders.>".to_string()]);
        assert!(broker.stream_info("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_publish_without_stream_fails() {
        let (_server, broker) = setup(&[]).await;

        let result = broker.publish("orders", Bytes::from("x"), None).await;

        assert_matches!(result, Err(Error::NoStream(_)));
    }

    #[tokio::test]
    async fn test_fetch_returns_messages_in_order() {
        let (_server, broker) = setup(&[StreamSpec::new("orders", ["orders"])]).await;

        for i in 1..=3 {
            let seq = broker
                .publish("orders", Bytes::from(format!("hello {i}")), None)
                .await
                .unwrap();
            assert_eq!(seq, i);
        }

        let mut consumer = broker
            .pull_subscribe(&ConsumerSpec::new("orders", "worker"))
            .await
            .unwrap();

        let batch = consumer.fetch(10, Duration::from_millis(50)).await.unwrap();
        assert_eq!(
            texts(&batch),
            vec![&b"hello 1"[..], &b"hello 2"[..], &b"hello 3"[..]]
        );
        assert_eq!(batch[2].info().stream_sequence, 3);
        assert_eq!(batch[2].info().consumer_sequence, 3);
    }

    #[tokio::test]
    async fn test_empty_fetch_returns_empty_batch() {
        let (_server, broker) = setup(&[StreamSpec::new("orders", ["orders"])]).await;
        let mut consumer = broker
            .pull_subscribe(&ConsumerSpec::new("orders", "worker"))
            .await
            .unwrap();

        let batch = consumer.fetch(1, Duration::from_millis(30)).await.unwrap();

        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_wakes_on_publish() {
        let (_server, broker) = setup(&[StreamSpec::new("orders", ["orders"])]).await;
        let mut consumer = broker
            .pull_subscribe(&ConsumerSpec::new("orders", "worker"))
            .await
            .unwrap();

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher
                .publish("orders", Bytes::from("late"), None)
                .await
                .unwrap();
        });

        let batch = consumer.fetch(1, Duration::from_secs(5)).await.unwrap();

        assert_eq!(texts(&batch), vec![&b"late"[..]]);
    }

    #[tokio::test]
    async fn test_unacked_message_is_redelivered_after_ack_wait() {
        let (server, broker) = setup(&[StreamSpec::new("orders", ["orders"])]).await;
        broker
            .publish("orders", Bytes::from("hello 1"), None)
            .await
            .unwrap();

        let spec = ConsumerSpec::new("orders", "worker").with_ack_wait(Duration::from_millis(100));
        let mut consumer = broker.pull_subscribe(&spec).await.unwrap();

        let first = consumer.fetch(1, Duration::from_millis(50)).await.unwrap();
        assert_eq!(first[0].info().delivered, 1);
        assert_eq!(server.ack_pending("orders", "worker"), Some(1));

        let second = consumer.fetch(1, Duration::from_secs(2)).await.unwrap();
        assert_eq!(texts(&second), vec![&b"hello 1"[..]]);
        assert_eq!(second[0].info().delivered, 2);

        second[0].ack().await.unwrap();
        assert_eq!(server.ack_pending("orders", "worker"), Some(0));

        let third = consumer.fetch(1, Duration::from_millis(200)).await.unwrap();
        assert!(third.is_empty());
    }

    #[tokio::test]
    async fn test_nak_redelivers_immediately() {
        let (_server, broker) = setup(&[StreamSpec::new("orders", ["orders"])]).await;
        broker
            .publish("orders", Bytes::from("retry me"), None)
            .await
            .unwrap();

        let mut consumer = broker
            .pull_subscribe(&ConsumerSpec::new("orders", "worker"))
            .await
            .unwrap();

        let first = consumer.fetch(1, Duration::from_millis(50)).await.unwrap();
        first[0].nak(None).await.unwrap();

        let second = consumer.fetch(1, Duration::from_millis(500)).await.unwrap();
        assert_eq!(second[0].info().stream_sequence, 1);
        assert_eq!(second[0].info().delivered, 2);
    }

    #[tokio::test]
    async fn test_max_deliver_stops_redelivery() {
        let (_server, broker) = setup(&[StreamSpec::new("orders", ["orders"])]).await;
        broker
            .publish("orders", Bytes::from("poison"), None)
            .await
            .unwrap();

        let spec = ConsumerSpec::new("orders", "worker").with_max_deliver(1);
        let mut consumer = broker.pull_subscribe(&spec).await.unwrap();

        let first = consumer.fetch(1, Duration::from_millis(50)).await.unwrap();
        first[0].nak(None).await.unwrap();

        let second = consumer.fetch(1, Duration::from_millis(100)).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_ack_policy_none_never_redelivers() {
        let (server, broker) = setup(&[StreamSpec::new("orders", ["orders"])]).await;
        broker
            .publish("orders", Bytes::from("fire and forget"), None)
            .await
            .unwrap();

        let spec = ConsumerSpec::new("orders", "worker")
            .with_ack_policy(AckPolicy::None)
            .with_ack_wait(Duration::from_millis(20));
        let mut consumer = broker.pull_subscribe(&spec).await.unwrap();

        assert_eq!(consumer.fetch(1, Duration::from_millis(50)).await.unwrap().len(), 1);
        assert_eq!(server.ack_pending("orders", "worker"), Some(0));
        assert!(consumer.fetch(1, Duration::from_millis(80)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_durable_shares_work() {
        let (_server, broker) = setup(&[StreamSpec::new("orders", ["orders"])]).await;
        for i in 0..4 {
            broker
                .publish("orders", Bytes::from(format!("job {i}")), None)
                .await
                .unwrap();
        }

        let spec = ConsumerSpec::new("orders", "workers");
        let mut a = broker.pull_subscribe(&spec).await.unwrap();
        let mut b = broker.pull_subscribe(&spec).await.unwrap();

        let from_a = a.fetch(2, Duration::from_millis(50)).await.unwrap();
        let from_b = b.fetch(2, Duration::from_millis(50)).await.unwrap();

        let mut seqs: Vec<u64> = from_a
            .iter()
            .chain(from_b.iter())
            .map(|d| d.info().stream_sequence)
            .collect();
        seqs.sort_unstable();

        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_durable_resumes_after_reconnect() {
        let (server, broker) = setup(&[StreamSpec::new("orders", ["orders"])]).await;
        let spec = ConsumerSpec::new("orders", "worker");

        broker
            .publish("orders", Bytes::from("one"), None)
            .await
            .unwrap();

        let mut consumer = broker.pull_subscribe(&spec).await.unwrap();
        let batch = consumer.fetch(1, Duration::from_millis(50)).await.unwrap();
        batch[0].ack().await.unwrap();
        consumer.unsubscribe().await.unwrap();
        broker.close().await.unwrap();

        let broker = MemoryBroker::connect(&[server.address().to_string()], MemoryBrokerOptions)
            .await
            .unwrap();
        broker
            .publish("orders", Bytes::from("two"), None)
            .await
            .unwrap();

        let mut consumer = broker.pull_subscribe(&spec).await.unwrap();
        let batch = consumer.fetch(10, Duration::from_millis(50)).await.unwrap();

        assert_eq!(texts(&batch), vec![&b"two"[..]]);
    }

    #[tokio::test]
    async fn test_deliver_new_skips_history() {
        let (_server, broker) = setup(&[StreamSpec::new("orders", ["orders"])]).await;
        broker
            .publish("orders", Bytes::from("old"), None)
            .await
            .unwrap();

        let spec = ConsumerSpec::new("orders", "worker").with_deliver_policy(DeliverPolicy::New);
        let mut consumer = broker.pull_subscribe(&spec).await.unwrap();

        broker
            .publish("orders", Bytes::from("new"), None)
            .await
            .unwrap();

        let batch = consumer.fetch(10, Duration::from_millis(50)).await.unwrap();
        assert_eq!(texts(&batch), vec![&b"new"[..]]);
    }

    #[tokio::test]
    async fn test_filter_subject_narrows_delivery() {
        let (_server, broker) = setup(&[StreamSpec::new("KV_cfg", ["$KV.cfg.>"])]).await;
        broker
            .publish("$KV.cfg.a", Bytes::from("a"), None)
            .await
            .unwrap();
        broker
            .publish("$KV.cfg.b", Bytes::from("b"), None)
            .await
            .unwrap();

        let mut consumer = broker
            .pull_subscribe(&ConsumerSpec::new("$KV.cfg.b", "b_only"))
            .await
            .unwrap();
        let batch = consumer.fetch(10, Duration::from_millis(50)).await.unwrap();

        assert_eq!(texts(&batch), vec![&b"b"[..]]);
        assert_eq!(batch[0].subject(), "$KV.cfg.b");
    }

    #[tokio::test]
    async fn test_history_limit_keeps_latest_per_subject() {
        let spec = StreamSpec::new("KV_cfg", ["$KV.cfg.>"]).with_max_messages_per_subject(1);
        let (_server, broker) = setup(&[spec]).await;

        broker
            .publish("$KV.cfg.a", Bytes::from("1"), None)
            .await
            .unwrap();
        broker
            .publish("$KV.cfg.b", Bytes::from("x"), None)
            .await
            .unwrap();
        broker
            .publish("$KV.cfg.a", Bytes::from("2"), None)
            .await
            .unwrap();

        let info = broker.stream_info("KV_cfg").await.unwrap().unwrap();
        assert_eq!(info.messages, 2);
        assert_eq!(info.last_sequence, 3);

        let last = broker
            .last_message("KV_cfg", "$KV.cfg.a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.payload, Bytes::from("2"));
        assert_eq!(last.sequence, 3);

        assert!(
            broker
                .last_message("KV_cfg", "$KV.cfg.zzz")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_headers_are_preserved() {
        let (_server, broker) = setup(&[StreamSpec::new("KV_cfg", ["$KV.cfg.>"])]).await;
        let mut headers = Headers::new();
        headers.insert("KV-Operation".to_string(), "DEL".to_string());

        broker
            .publish("$KV.cfg.a", Bytes::new(), Some(headers))
            .await
            .unwrap();

        let mut consumer = broker
            .pull_subscribe(&ConsumerSpec::new("$KV.cfg.>", "watcher"))
            .await
            .unwrap();
        let batch = consumer.fetch(1, Duration::from_millis(50)).await.unwrap();

        assert_eq!(batch[0].header("KV-Operation"), Some("DEL"));
    }

    #[tokio::test]
    async fn test_close_fails_pending_fetch_and_ends_subscription() {
        let (_server, broker) = setup(&[StreamSpec::new("orders", ["orders"])]).await;
        let mut consumer = broker
            .pull_subscribe(&ConsumerSpec::new("orders", "puller"))
            .await
            .unwrap();
        let mut subscription = broker
            .subscribe(&ConsumerSpec::new("orders", "pusher"))
            .await
            .unwrap();

        let closer = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close().await.unwrap();
        });

        let fetched = consumer.fetch(1, Duration::from_secs(5)).await;
        assert_matches!(fetched, Err(Error::Closed));

        let next = timeout(Duration::from_secs(1), subscription.next())
            .await
            .unwrap();
        assert!(next.is_none());

        let publish = broker.publish("orders", Bytes::from("late"), None).await;
        assert_matches!(publish, Err(ref e) if e.kind() == ErrorKind::Closed);
    }

    #[tokio::test]
    async fn test_subscription_yields_each_message() {
        let (_server, broker) = setup(&[StreamSpec::new("orders", ["orders"])]).await;
        let mut subscription = broker
            .subscribe(&ConsumerSpec::new("orders", "pusher"))
            .await
            .unwrap();

        broker
            .publish("orders", Bytes::from("a"), None)
            .await
            .unwrap();
        broker
            .publish("orders", Bytes::from("b"), None)
            .await
            .unwrap();

        let a = subscription.next().await.unwrap().unwrap();
        let b = subscription.next().await.unwrap().unwrap();

        assert_eq!(a.payload(), &Bytes::from("a"));
        assert_eq!(b.payload(), &Bytes::from("b"));
        subscription.unsubscribe().await.unwrap();
    }

    #[tokio::test]
    async fn test_stopped_server_refuses_new_connections() {
        let (server, _broker) = setup(&[]).await;
        server.stop();

        let result =
            MemoryBroker::connect(&[server.address().to_string()], MemoryBrokerOptions).await;

        assert_matches!(result, Err(Error::Unreachable(_)));
    }
}
