use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use construct_config::KafkaConfig;
use futures_util::FutureExt;
use rdkafka::consumer::{CommitMode, Consumer as _, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use rdkafka::{Message as _, Offset, TopicPartitionList};
use tracing::info;

use super::broker::{BrokerClient, BrokerHandle, FetchedRecord};
use super::config::consumer_client_config;

/// [`BrokerClient`] over an rdkafka `StreamConsumer`.
///
/// Offsets are managed manually (`enable.auto.commit=false`); nothing is
/// committed unless a commit router asks for it.
pub struct KafkaBroker {
    consumer: Arc<StreamConsumer>,
}

impl KafkaBroker {
    /// Create the consumer and subscribe to every configured topic.
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        if !config.enabled {
            bail!("Kafka is disabled (KAFKA_ENABLED=false), cannot consume");
        }

        let consumer: StreamConsumer = consumer_client_config(config)?
            .create()
            .context("Failed to create Kafka consumer")?;

        let topics: Vec<&str> = config.topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topics)
            .context("Failed to subscribe to Kafka topics")?;

        info!(topics = ?topics, "Kafka consumer subscribed");

        Ok(Self {
            consumer: Arc::new(consumer),
        })
    }
}

fn to_record(message: &BorrowedMessage<'_>) -> FetchedRecord {
    let handle = BrokerHandle::new(message.topic(), message.partition(), message.offset());
    FetchedRecord::new(handle, message.payload().map(Bytes::copy_from_slice))
}

#[async_trait::async_trait]
impl BrokerClient for KafkaBroker {
    async fn fetch(&self, max_records: usize) -> Result<Vec<FetchedRecord>> {
        let first = self
            .consumer
            .recv()
            .await
            .context("Kafka consumer error")?;

        let mut records = Vec::with_capacity(max_records);
        records.push(to_record(&first));

        // Take whatever is already buffered, without waiting for more
        while records.len() < max_records {
            match self.consumer.recv().now_or_never() {
                Some(Ok(message)) => records.push(to_record(&message)),
                Some(Err(e)) => return Err(e).context("Kafka consumer error"),
                None => break,
            }
        }

        Ok(records)
    }

    async fn commit(&self, handles: &[BrokerHandle]) -> Result<()> {
        if handles.is_empty() {
            return Ok(());
        }

        let mut offsets = TopicPartitionList::with_capacity(handles.len());
        for handle in handles {
            // Kafka stores the next offset to read
            offsets
                .add_partition_offset(
                    handle.topic(),
                    handle.partition(),
                    Offset::Offset(handle.offset() + 1),
                )
                .with_context(|| {
                    format!(
                        "Invalid offset {} for {}[{}]",
                        handle.offset(),
                        handle.topic(),
                        handle.partition()
                    )
                })?;
        }

        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync))
            .await
            .context("Offset commit task panicked")?
            .context("Failed to commit offset")?;

        Ok(())
    }
}
