use anyhow::Result;
use bytes::Bytes;

/// Broker-side position of a fetched record.
///
/// Only broker implementations look inside it; message consumers never see it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerHandle {
    topic: String,
    partition: i32,
    offset: i64,
}

impl BrokerHandle {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Offset of the record itself (not the next offset to read).
    pub fn offset(&self) -> i64 {
        self.offset
    }
}

/// One record returned by [`BrokerClient::fetch`].
#[derive(Debug, Clone)]
pub struct FetchedRecord {
    pub topic: String,
    /// `None` when the broker delivered a record without a value
    pub payload: Option<Bytes>,
    pub handle: BrokerHandle,
}

impl FetchedRecord {
    pub fn new(handle: BrokerHandle, payload: Option<Bytes>) -> Self {
        Self {
            topic: handle.topic().to_string(),
            payload,
            handle,
        }
    }
}

/// Lower-level broker client the engine is built on.
///
/// Implementations:
/// - [`KafkaBroker`](super::kafka_broker::KafkaBroker) over rdkafka
/// - in-memory doubles in tests
#[async_trait::async_trait]
pub trait BrokerClient: Send + Sync {
    /// Wait for at least one record and return up to `max_records`, in
    /// arrival order. An error here is fatal for the engine.
    async fn fetch(&self, max_records: usize) -> Result<Vec<FetchedRecord>>;

    /// Acknowledge every handle in a single broker round-trip.
    ///
    /// Committing a handle implicitly acknowledges every earlier offset of
    /// the same partition. An error here is fatal for the engine.
    async fn commit(&self, handles: &[BrokerHandle]) -> Result<()>;
}
