use anyhow::{Context, Result};
use construct_config::KafkaConfig;
use futures_util::future::join_all;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use super::config::create_client_config;
use super::error::{StreamError, StreamResult};
use super::metrics;

/// Kafka producer for raw payloads
///
/// This producer is configured for:
/// - At-least-once delivery guarantees
/// - Idempotent writes (no duplicates within producer session)
/// - Settings from `KAFKA_PRODUCER_*` (acks, compression, linger, batching)
#[derive(Clone)]
pub struct MessageProducer {
    // None when Kafka is disabled
    producer: Option<Arc<FutureProducer>>,
}

impl MessageProducer {
    /// Create a new Kafka producer from the application configuration.
    ///
    /// # Arguments
    /// * `config` - The Kafka configuration struct.
    ///
    /// # Configuration
    /// - `acks`: replicas that must acknowledge (`all` by default).
    /// - `enable.idempotence`: prevent duplicate writes.
    /// - `retries`: retry transient errors (indefinitely by default).
    /// - `compression.type`, `linger.ms`, `batch.size`: batching inside librdkafka.
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        if !config.enabled {
            info!("Kafka producer disabled (KAFKA_ENABLED=false)");
            return Ok(Self { producer: None });
        }

        info!("Initializing Kafka producer...");
        let mut client_config = create_client_config(config)?;

        let producer: FutureProducer = client_config
            // Reliability settings
            .set("acks", &config.producer_acks)
            .set(
                "enable.idempotence",
                config.producer_enable_idempotence.to_string(),
            )
            .set(
                "max.in.flight.requests.per.connection",
                config.producer_max_in_flight.to_string(),
            )
            .set("retries", config.producer_retries.to_string())
            // Performance settings
            .set("compression.type", &config.producer_compression)
            .set("linger.ms", config.producer_linger_ms.to_string())
            .set("batch.size", config.producer_batch_size.to_string())
            // Timeout settings
            .set(
                "request.timeout.ms",
                config.producer_request_timeout_ms.to_string(),
            )
            .set(
                "delivery.timeout.ms",
                config.producer_delivery_timeout_ms.to_string(),
            )
            .create()
            .context("Failed to create Kafka producer")?;

        info!("Kafka producer initialized successfully");

        Ok(Self {
            producer: Some(Arc::new(producer)),
        })
    }

    /// Send one record per payload to `topic` and wait for all acknowledgments.
    ///
    /// No batching or retry on top of librdkafka's own.
    ///
    /// # Returns
    /// * `Ok(())` - every payload was acknowledged (or Kafka is disabled)
    /// * `Err(StreamError::Kafka)` - the first failed record, tagged with `topic`
    pub async fn send<P: AsRef<[u8]>>(&self, topic: &str, payloads: &[P]) -> StreamResult<()> {
        if payloads.is_empty() {
            return Ok(());
        }

        let Some(producer) = &self.producer else {
            debug!(
                topic = %topic,
                count = payloads.len(),
                "Kafka disabled, dropping payloads"
            );
            return Ok(());
        };

        let start = Instant::now();

        let deliveries = payloads.iter().map(|payload| {
            let record = FutureRecord::<(), [u8]>::to(topic).payload(payload.as_ref());
            // 2 seconds to get into the local queue
            producer.send(record, Timeout::After(Duration::from_secs(2)))
        });

        let mut first_error = None;
        for delivery in join_all(deliveries).await {
            match delivery {
                Ok(_) => metrics::KAFKA_PRODUCE_SUCCESS.inc(),
                Err((kafka_err, _)) => {
                    metrics::KAFKA_PRODUCE_FAILURE.inc();
                    if first_error.is_none() {
                        first_error = Some(kafka_err);
                    }
                }
            }
        }

        let latency = start.elapsed();
        metrics::KAFKA_PRODUCE_LATENCY.observe(latency.as_secs_f64());

        if let Some(kafka_err) = first_error {
            error!(
                error = %kafka_err,
                topic = %topic,
                count = payloads.len(),
                latency_ms = latency.as_millis(),
                "Failed to send records to Kafka"
            );
            return Err(StreamError::Kafka {
                topic: topic.to_string(),
                source: anyhow::Error::new(kafka_err).context("Kafka send failed"),
            });
        }

        debug!(
            topic = %topic,
            count = payloads.len(),
            latency_ms = latency.as_millis(),
            "Records persisted to Kafka"
        );

        Ok(())
    }

    /// Check if Kafka is enabled
    pub fn is_enabled(&self) -> bool {
        self.producer.is_some()
    }

    /// Flush pending messages (for graceful shutdown)
    ///
    /// This waits for all in-flight messages to be acknowledged.
    /// Should be called before application shutdown.
    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        let Some(producer) = &self.producer else {
            return Ok(());
        };

        info!("Flushing Kafka producer (timeout: {:?})", timeout);

        let producer = producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .context("Flush task panicked")?
            .context("Failed to flush Kafka producer")?;

        info!("Kafka producer flushed successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled_config() -> KafkaConfig {
        let mut config = KafkaConfig::new(
            vec!["localhost:9092".to_string()],
            "test-group",
            vec!["test-topic".to_string()],
        );
        config.enabled = false;
        config
    }

    #[test]
    fn test_disabled_producer_creation() {
        let producer = MessageProducer::new(&disabled_config());

        assert!(producer.is_ok());
        assert!(!producer.unwrap().is_enabled());
    }

    #[tokio::test]
    async fn test_disabled_producer_send() {
        let producer = MessageProducer::new(&disabled_config()).unwrap();

        let result = producer.send("test-topic", &[b"one".as_slice(), b"two".as_slice()]).await;
        assert!(result.is_ok());
        assert!(producer.flush(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_send_is_noop() {
        let producer = MessageProducer::new(&disabled_config()).unwrap();
        let payloads: [Vec<u8>; 0] = [];

        assert!(producer.send("test-topic", &payloads).await.is_ok());
    }

    #[tokio::test]
    async fn test_send_to_unreachable_broker_reports_topic() {
        // Nothing listens on port 1; deliveries time out quickly
        let mut config = KafkaConfig::new(
            vec!["127.0.0.1:1".to_string()],
            "test-group",
            vec!["test-topic".to_string()],
        );
        config.producer_linger_ms = 0;
        config.producer_request_timeout_ms = 100;
        config.producer_delivery_timeout_ms = 300;
        config.producer_enable_idempotence = false;

        let producer = MessageProducer::new(&config).unwrap();
        assert!(producer.is_enabled());

        let failures_before = metrics::KAFKA_PRODUCE_FAILURE.get();
        let err = producer
            .send("audit-events", &[b"one".as_slice(), b"two".as_slice()])
            .await
            .unwrap_err();

        assert!(
            matches!(err, StreamError::Kafka { ref topic, .. } if topic == "audit-events"),
            "got {err:?}"
        );
        assert!(err.to_string().contains("audit-events"));
        assert!(metrics::KAFKA_PRODUCE_FAILURE.get() >= failures_before + 2);
    }
}
