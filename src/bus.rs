//! Publish/subscribe transport.
//!
//! Components only see [`BusMessage`] receivers and a [`Publisher`], so the
//! same code runs against Kafka or against the in-process [`MemoryBus`].

use std::future::Future;
use std::time::Duration;

use rdkafka::{
    Message,
    config::ClientConfig,
    consumer::{Consumer, StreamConsumer},
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::BusConfig;
use crate::error::{BusError, Result};

/// Buffered messages per subscription before the forwarder waits.
const SUBSCRIPTION_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

pub trait Publisher: Clone + Send + Sync + 'static {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: String,
    ) -> impl Future<Output = Result<(), BusError>> + Send;
}

/// A transport that can also open subscriptions.
pub trait Bus: Publisher {
    /// Delivers every message published on `topics` after this call.
    /// `component` names the subscriber in logs and consumer groups.
    fn subscribe_to(
        &self,
        component: &str,
        topics: &[&str],
    ) -> Result<mpsc::Receiver<BusMessage>, BusError>;
}

pub async fn publish_json<P, T>(publisher: &P, topic: &str, key: &str, value: &T) -> Result<()>
where
    P: Publisher,
    T: Serialize,
{
    let payload = serde_json::to_string(value)?;
    publisher.publish(topic, key, payload).await?;
    Ok(())
}

/// Kafka producer plus the settings needed to open consumers.
#[derive(Clone)]
pub struct KafkaBus {
    producer: FutureProducer,
    bootstrap_servers: String,
    send_timeout: Duration,
}

impl KafkaBus {
    pub fn connect(config: &BusConfig) -> Result<Self, BusError> {
        let bootstrap_servers = config.bootstrap_servers();
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &bootstrap_servers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .create()?;

        Ok(KafkaBus {
            producer,
            bootstrap_servers,
            send_timeout: Duration::from_secs(0),
        })
    }
}

impl Bus for KafkaBus {
    /// Opens a consumer on `topics` and forwards everything it receives.
    ///
    /// Each call joins a fresh consumer group so every subscriber sees every
    /// message, and starts from the latest offset.
    fn subscribe_to(
        &self,
        component: &str,
        topics: &[&str],
    ) -> Result<mpsc::Receiver<BusMessage>, BusError> {
        let group_id = format!("{component}-{}", Uuid::new_v4());
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", "latest")
            .set("enable.auto.commit", "true")
            .set("enable.partition.eof", "false")
            .create()?;
        consumer.subscribe(topics)?;
        debug!(group = %group_id, ?topics, "kafka consumer subscribed");

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(async move {
            loop {
                // Borrowed messages are not Send; copy out before the next await
                let forwarded = match consumer.recv().await {
                    Ok(message) => {
                        let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
                        Some(BusMessage::new(message.topic(), payload))
                    }
                    Err(e) => {
                        warn!(group = %group_id, error = %e, "kafka receive failed");
                        None
                    }
                };

                match forwarded {
                    Some(message) => {
                        if tx.send(message).await.is_err() {
                            debug!(group = %group_id, "subscriber dropped, closing consumer");
                            break;
                        }
                    }
                    None => tokio::time::sleep(Duration::from_secs(1)).await,
                }
            }
        });

        Ok(rx)
    }
}

impl Publisher for KafkaBus {
    async fn publish(&self, topic: &str, key: &str, payload: String) -> Result<(), BusError> {
        self.producer
            .send(
                FutureRecord::to(topic).payload(&payload).key(key),
                Timeout::After(self.send_timeout),
            )
            .await
            .map_err(|(e, _)| BusError::Kafka(e))?;
        Ok(())
    }
}

/// In-process bus with the same fan-out semantics as a topic subscription.
#[derive(Clone)]
pub struct MemoryBus {
    tx: broadcast::Sender<BusMessage>,
}

impl MemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Receives every message published on `topics` from now on.
    pub fn subscribe(&self, topics: &[&str]) -> mpsc::Receiver<BusMessage> {
        let wanted: Vec<String> = topics.iter().map(|t| t.to_string()).collect();
        let mut source = self.tx.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(message) => {
                        if !wanted.iter().any(|t| *t == message.topic) {
                            continue;
                        }
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "memory bus subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        rx
    }
}

impl Bus for MemoryBus {
    fn subscribe_to(
        &self,
        component: &str,
        topics: &[&str],
    ) -> Result<mpsc::Receiver<BusMessage>, BusError> {
        debug!(component, ?topics, "memory subscription opened");
        Ok(self.subscribe(topics))
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Publisher for MemoryBus {
    async fn publish(&self, topic: &str, key: &str, payload: String) -> Result<(), BusError> {
        // No subscribers means nobody is listening; the message is dropped
        if self.tx.send(BusMessage::new(topic, payload)).is_err() {
            debug!(topic, key, "published with no subscribers");
        }
        Ok(())
    }
}

/// Logs a failed publish; transport errors never stop a component.
pub fn log_publish_failure(component: &str, topic: &str, err: &crate::error::Error) {
    error!(component, topic, error = %err, "publish failed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_bus_filters_by_topic() {
        let bus = MemoryBus::new(16);
        let mut lanes = bus.subscribe(&["traffic.lane1"]);
        let mut everything = bus.subscribe(&["traffic.lane1", "traffic.emergency"]);

        bus.publish("traffic.emergency", "rfid", "{}".into()).await.unwrap();
        bus.publish("traffic.lane1", "ir", "[1]".into()).await.unwrap();

        let first = lanes.recv().await.unwrap();
        assert_eq!(first, BusMessage::new("traffic.lane1", "[1]"));

        assert_eq!(everything.recv().await.unwrap().topic, "traffic.emergency");
        assert_eq!(everything.recv().await.unwrap().topic, "traffic.lane1");
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_not_an_error() {
        let bus = MemoryBus::default();
        assert!(bus.publish("traffic.summary", "k", "{}".into()).await.is_ok());
    }

    #[tokio::test]
    async fn publish_json_serializes_value() {
        let bus = MemoryBus::default();
        let mut rx = bus.subscribe(&["t"]);
        publish_json(&bus, "t", "k", &serde_json::json!({"a": 1}))
            .await
            .unwrap();
        let message = rx.recv().await.unwrap();
        assert_eq!(message.payload, br#"{"a":1}"#.to_vec());
    }
}
