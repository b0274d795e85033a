//! Broker dispatch for the outbox publisher. `EventBroker` is the seam the
//! publisher (outbox::publisher) codes against; `KafkaEventBroker` is the
//! production implementation over `rdkafka`, grounded on the shape the
//! teacher's `kafka_event_bus.rs` sketched (`EventBusConfig`, producer held
//! behind an `Arc`) but actually wired up rather than left as a TODO stub.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub topic: String,
    pub partition_key: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait EventBroker: Send + Sync {
    async fn publish(&self, message: OutboundMessage) -> Result<(), AppError>;
}

pub struct KafkaEventBroker {
    producer: FutureProducer,
}

impl KafkaEventBroker {
    pub fn new(brokers: &str, client_id: &str) -> Result<Self, AppError> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("client.id", client_id)
            .set("message.timeout.ms", "10000")
            .create()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to create kafka producer: {e}")))?;
        Ok(Self { producer })
    }
}

#[async_trait]
impl EventBroker for KafkaEventBroker {
    async fn publish(&self, message: OutboundMessage) -> Result<(), AppError> {
        let record = FutureRecord::to(&message.topic)
            .key(&message.partition_key)
            .payload(&message.payload);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| AppError::Internal(anyhow::anyhow!("kafka send failed: {e}")))?;
        Ok(())
    }
}

/// In-memory broker used by tests and local development without a running
/// Kafka cluster; records every message it would have sent.
#[derive(Default)]
pub struct InMemoryEventBroker {
    pub sent: tokio::sync::Mutex<Vec<OutboundMessage>>,
}

#[async_trait]
impl EventBroker for InMemoryEventBroker {
    async fn publish(&self, message: OutboundMessage) -> Result<(), AppError> {
        self.sent.lock().await.push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_broker_records_messages_in_order() {
        let broker = InMemoryEventBroker::default();
        broker
            .publish(OutboundMessage { topic: "fluxpay.order.events".into(), partition_key: "t:1".into(), payload: vec![1] })
            .await
            .unwrap();
        broker
            .publish(OutboundMessage { topic: "fluxpay.order.events".into(), partition_key: "t:1".into(), payload: vec![2] })
            .await
            .unwrap();
        let sent = broker.sent.lock().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].payload, vec![1]);
        assert_eq!(sent[1].payload, vec![2]);
    }
}
