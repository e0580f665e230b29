use async_trait::async_trait;
use courier_client::{
    AckError, ConsumerHandler, ConsumerHandlerError, Delivery, JsonCodec, WatchEvent,
    WatchHandler, WatchHandlerError,
};
use serde_json::Value;
use tracing::{info, warn};

/// Failure to acknowledge a message.
#[derive(Debug, thiserror::Error)]
#[error("failed to acknowledge: {0}")]
pub struct AckFailed(#[source] AckError);

impl ConsumerHandlerError for AckFailed {}
impl WatchHandlerError for AckFailed {}

/// Logs every order and acknowledges it. Orders that do not decode are left
/// unacknowledged and come back after the consumer's `ack_wait`.
#[derive(Clone, Debug)]
pub struct LogOrders;

#[async_trait]
impl ConsumerHandler for LogOrders {
    type Error = AckFailed;

    async fn handle(&self, delivery: Delivery) -> Result<(), Self::Error> {
        let order = match delivery.decode::<Value, _>(&JsonCodec) {
            Ok(order) => order,
            Err(error) => {
                warn!(
                    subject = %delivery.subject(),
                    sequence = delivery.info().stream_sequence,
                    delivered = delivery.info().delivered,
                    %error,
                    "undecodable order left unacknowledged"
                );
                return Ok(());
            }
        };

        info!(
            subject = %delivery.subject(),
            sequence = delivery.info().stream_sequence,
            delivered = delivery.info().delivered,
            %order,
            "order received"
        );

        delivery.ack().await.map_err(AckFailed)
    }
}

/// Logs every change to the watched bucket and acknowledges it.
#[derive(Clone, Debug)]
pub struct LogChanges;

#[async_trait]
impl WatchHandler<Value> for LogChanges {
    type Error = AckFailed;

    async fn on_change(&self, event: WatchEvent<Value>) -> Result<(), Self::Error> {
        info!(
            bucket = %event.bucket,
            key = %event.key,
            operation = %event.operation,
            revision = event.revision,
            value = ?event.value,
            "bucket changed"
        );

        event.ack().await.map_err(AckFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use courier_broker::{Acker, DeliveryInfo, Headers};

    #[derive(Debug, Default)]
    struct CountingAcker {
        acks: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Acker for CountingAcker {
        async fn ack(&self) -> Result<(), AckError> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn nak(&self, _delay: Option<Duration>) -> Result<(), AckError> {
            Ok(())
        }
    }

    fn delivery(payload: &'static str, acks: &Arc<AtomicUsize>) -> Delivery {
        Delivery::new(
            "orders".to_string(),
            Bytes::from(payload),
            Headers::new(),
            DeliveryInfo::default(),
            Box::new(CountingAcker { acks: acks.clone() }),
        )
    }

    #[tokio::test]
    async fn test_decoded_order_is_acknowledged() {
        let acks = Arc::new(AtomicUsize::new(0));

        LogOrders
            .handle(delivery(r#"{"text":"hello 1"}"#, &acks))
            .await
            .unwrap();

        assert_eq!(acks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_undecodable_order_is_left_unacknowledged() {
        let acks = Arc::new(AtomicUsize::new(0));

        LogOrders
            .handle(delivery("not json", &acks))
            .await
            .unwrap();

        assert_eq!(acks.load(Ordering::SeqCst), 0);
    }
}
