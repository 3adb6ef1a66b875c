// ============================================================================
// Kafka Configuration
// ============================================================================

use std::time::Duration;

use crate::constants::*;

/// Kafka configuration shared by the ordered-commit consumer and the producer
#[derive(Clone, Debug)]
pub struct KafkaConfig {
    /// Whether Kafka is enabled (false = producer becomes a no-op)
    pub enabled: bool,
    /// Seed broker addresses (e.g., ["kafka1:9092", "kafka2:9092"])
    pub brokers: Vec<String>,
    /// Consumer group identifier
    pub consumer_group: String,
    /// Topics consumed by this instance, fixed for its whole lifetime
    pub topics: Vec<String>,
    /// SSL/TLS enabled
    pub ssl_enabled: bool,
    /// SASL mechanism (e.g., "SCRAM-SHA-256", "PLAIN")
    pub sasl_mechanism: Option<String>,
    /// SASL username
    pub sasl_username: Option<String>,
    /// SASL password
    pub sasl_password: Option<String>,
    /// Path to CA certificate file (for self-signed certificates)
    pub ssl_ca_location: Option<String>,
    /// Consumer engine tuning
    pub consumer: ConsumerTuning,
    // producer-specific settings
    pub producer_compression: String, // "zstd" | "snappy" | "gzip" | "lz4" | "none"
    pub producer_acks: String,        // "all" | "1" | "-1" | "0"
    pub producer_linger_ms: u32,
    pub producer_batch_size: u32,
    pub producer_max_in_flight: u32,
    pub producer_retries: u32,
    pub producer_request_timeout_ms: u32,
    pub producer_delivery_timeout_ms: u32,
    pub producer_enable_idempotence: bool,
}

/// Tuning knobs of the consumption engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerTuning {
    /// Completed handles buffered per topic before `commit` starts waiting
    pub commit_queue_capacity: usize,
    /// Dispatched handles buffered before the dispatch loop starts waiting
    pub output_queue_capacity: usize,
    /// How long dispatch waits for a worker to take a message before the
    /// process is considered stuck (0 = disabled)
    pub deadman_timeout_ms: u64,
    /// Maximum records pulled per fetch call
    pub fetch_batch_size: usize,
    /// Upper bound of dispatched-but-uncommitted records.
    /// Accepted for compatibility, not enforced.
    pub max_uncommitted_records: usize,
    /// Verbose per-message logging and librdkafka debug contexts
    pub debug: bool,
}

impl Default for ConsumerTuning {
    fn default() -> Self {
        Self {
            commit_queue_capacity: DEFAULT_COMMIT_QUEUE_CAPACITY,
            output_queue_capacity: DEFAULT_OUTPUT_QUEUE_CAPACITY,
            deadman_timeout_ms: DEFAULT_DEADMAN_TIMEOUT_MS,
            fetch_batch_size: DEFAULT_FETCH_BATCH_SIZE,
            max_uncommitted_records: DEFAULT_MAX_UNCOMMITTED_RECORDS,
            debug: false,
        }
    }
}

impl ConsumerTuning {
    /// Deadman timeout, `None` when disabled.
    pub fn deadman_timeout(&self) -> Option<Duration> {
        match self.deadman_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub(crate) fn from_env() -> Self {
        Self {
            commit_queue_capacity: env_parse(
                "KAFKA_COMMIT_QUEUE_CAPACITY",
                DEFAULT_COMMIT_QUEUE_CAPACITY,
            ),
            output_queue_capacity: env_parse(
                "KAFKA_OUTPUT_QUEUE_CAPACITY",
                DEFAULT_OUTPUT_QUEUE_CAPACITY,
            ),
            deadman_timeout_ms: env_parse("KAFKA_DEADMAN_TIMEOUT_MS", DEFAULT_DEADMAN_TIMEOUT_MS),
            fetch_batch_size: env_parse("KAFKA_FETCH_BATCH_SIZE", DEFAULT_FETCH_BATCH_SIZE),
            max_uncommitted_records: env_parse(
                "KAFKA_MAX_UNCOMMITTED_RECORDS",
                DEFAULT_MAX_UNCOMMITTED_RECORDS,
            ),
            debug: env_parse("KAFKA_DEBUG", false),
        }
    }
}

impl KafkaConfig {
    /// Configuration pointing at a local broker with engine defaults.
    ///
    /// Handy for tests and embedders that fill in the fields themselves.
    pub fn new(
        brokers: Vec<String>,
        consumer_group: impl Into<String>,
        topics: Vec<String>,
    ) -> Self {
        Self {
            enabled: true,
            brokers,
            consumer_group: consumer_group.into(),
            topics,
            ssl_enabled: false,
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
            ssl_ca_location: None,
            consumer: ConsumerTuning::default(),
            producer_compression: "snappy".to_string(),
            producer_acks: "all".to_string(),
            producer_linger_ms: 10,
            producer_batch_size: 16384,
            producer_max_in_flight: 5,
            producer_retries: 2147483647,
            producer_request_timeout_ms: 30000,
            producer_delivery_timeout_ms: 120000,
            producer_enable_idempotence: true,
        }
    }

    /// Seed brokers joined the way librdkafka expects `bootstrap.servers`.
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    pub(crate) fn from_env() -> Self {
        Self {
            enabled: env_parse("KAFKA_ENABLED", false),
            brokers: env_list("KAFKA_BROKERS", "localhost:9092"),
            consumer_group: std::env::var("KAFKA_CONSUMER_GROUP")
                .unwrap_or_else(|_| "construct-stream-workers".to_string()),
            topics: env_list("KAFKA_TOPICS", "construct-messages"),
            ssl_enabled: env_parse("KAFKA_SSL_ENABLED", false),
            sasl_mechanism: std::env::var("KAFKA_SASL_MECHANISM").ok(),
            sasl_username: std::env::var("KAFKA_SASL_USERNAME").ok(),
            sasl_password: std::env::var("KAFKA_SASL_PASSWORD").ok(),
            ssl_ca_location: std::env::var("KAFKA_SSL_CA_LOCATION").ok(),
            consumer: ConsumerTuning::from_env(),
            // producer-specific settings
            producer_compression: std::env::var("KAFKA_PRODUCER_COMPRESSION")
                .unwrap_or_else(|_| "snappy".to_string()),
            producer_acks: std::env::var("KAFKA_PRODUCER_ACKS")
                .unwrap_or_else(|_| "all".to_string()),
            producer_linger_ms: env_parse("KAFKA_PRODUCER_LINGER_MS", 10),
            producer_batch_size: env_parse("KAFKA_PRODUCER_BATCH_SIZE", 16384),
            producer_max_in_flight: env_parse("KAFKA_PRODUCER_MAX_IN_FLIGHT", 5),
            producer_retries: env_parse("KAFKA_PRODUCER_RETRIES", 2147483647),
            producer_request_timeout_ms: env_parse("KAFKA_PRODUCER_REQUEST_TIMEOUT_MS", 30000),
            producer_delivery_timeout_ms: env_parse("KAFKA_PRODUCER_DELIVERY_TIMEOUT_MS", 120000),
            producer_enable_idempotence: env_parse("KAFKA_PRODUCER_ENABLE_IDEMPOTENCE", true),
        }
    }
}

/// Parse an env var, falling back to `default` when unset or unparsable.
pub(crate) fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Comma-separated env var, blank entries dropped.
fn env_list(key: &str, default: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
