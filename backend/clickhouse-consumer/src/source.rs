use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message};
use tracing::{debug, error, info};

use crate::config::KafkaConfig;
use crate::error::{ConsumerError, Result};

/// How long the startup metadata probe waits for the brokers
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A delivered message, detached from the broker client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
    /// UTF-8 headers; carries `traceparent` when the producer is instrumented
    pub headers: Vec<(String, String)>,
}

/// Ordered source of broker messages
#[async_trait]
pub trait MessageSource: Send {
    /// Open the broker connection
    async fn connect(&mut self) -> Result<()>;

    /// Join the consumer group on the configured topic
    async fn subscribe(&mut self) -> Result<()>;

    /// Wait for the next message
    ///
    /// # Returns
    /// * `Ok(Some(msg))` - Next message in delivery order
    /// * `Ok(None)` - The source is exhausted and will deliver nothing more
    /// * `Err(e)` - Transient receive error; the caller may try again
    async fn recv(&mut self) -> Result<Option<InboundMessage>>;

    /// Leave the group and drop the connection. Safe to call when not connected.
    async fn disconnect(&mut self) -> Result<()>;
}

/// Kafka message source backed by an rdkafka `StreamConsumer`
///
/// Offsets are auto-committed; a message counts as consumed once delivered.
pub struct KafkaSource {
    config: KafkaConfig,
    consumer: Option<Arc<StreamConsumer>>,
}

impl KafkaSource {
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            config,
            consumer: None,
        }
    }

    fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("group.id", &self.config.group_id)
            .set("bootstrap.servers", self.config.bootstrap_servers())
            .set("client.id", &self.config.client_id)
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "5000")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000")
            .set("enable.partition.eof", "false");
        client_config
    }

    fn consumer(&self, action: &'static str) -> Result<&StreamConsumer> {
        self.consumer
            .as_deref()
            .ok_or(ConsumerError::InvalidState {
                action,
                state: "disconnected",
            })
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn connect(&mut self) -> Result<()> {
        let consumer: StreamConsumer = self.client_config().create().map_err(|e| {
            error!("Failed to create Kafka consumer: {}", e);
            ConsumerError::from(e)
        })?;
        let consumer = Arc::new(consumer);

        // Client creation is lazy; a metadata round trip proves the brokers answer
        let probe = Arc::clone(&consumer);
        let topic = self.config.topic.clone();
        let metadata = tokio::task::spawn_blocking(move || {
            probe
                .fetch_metadata(Some(topic.as_str()), CONNECT_TIMEOUT)
                .map(|m| m.brokers().len())
        })
        .await
        .map_err(|e| ConsumerError::Kafka(format!("metadata probe aborted: {}", e)))?;

        let brokers = metadata.map_err(|e| {
            error!("Failed to reach Kafka brokers: {}", e);
            ConsumerError::from(e)
        })?;

        info!(
            brokers = brokers,
            bootstrap = %self.config.bootstrap_servers(),
            "connected to kafka"
        );
        self.consumer = Some(consumer);
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<()> {
        let topic = self.config.topic.as_str();
        self.consumer("subscribe")?
            .subscribe(&[topic])
            .map_err(|e| {
                error!("Failed to subscribe to topic: {}", e);
                ConsumerError::from(e)
            })?;

        info!(
            topic = topic,
            group_id = %self.config.group_id,
            "subscribed to topic"
        );
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<InboundMessage>> {
        let msg = self.consumer("receive")?.recv().await?;

        let headers = msg
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .filter_map(|h| {
                        let value = std::str::from_utf8(h.value?).ok()?;
                        Some((h.key.to_string(), value.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let inbound = InboundMessage {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            payload: msg.payload().map(<[u8]>::to_vec),
            headers,
        };

        debug!(
            topic = %inbound.topic,
            partition = inbound.partition,
            offset = inbound.offset,
            "received message"
        );
        Ok(Some(inbound))
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            // Dropping the last handle runs the blocking consumer close and
            // commits stored offsets
            tokio::task::spawn_blocking(move || drop(consumer))
                .await
                .map_err(|e| ConsumerError::Kafka(format!("consumer close aborted: {}", e)))?;
            info!("disconnected from kafka");
        }
        Ok(())
    }
}
