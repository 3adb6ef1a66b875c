// ============================================================================
// Construct Config - configuration for the stream engine and its workers
// ============================================================================
//
// Loads everything from environment variables (optionally seeded from a
// `.env` file) with sensible defaults.
//
// ============================================================================

mod constants;
mod kafka;
mod worker;

pub use kafka::{ConsumerTuning, KafkaConfig};
pub use worker::WorkerConfig;

use anyhow::Result;

/// Main configuration structure for the stream worker
#[derive(Clone, Debug)]
pub struct Config {
    pub rust_log: String,
    pub kafka: KafkaConfig,
    pub worker: WorkerConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let kafka = KafkaConfig::from_env();
        if kafka.topics.is_empty() {
            anyhow::bail!("KAFKA_TOPICS must name at least one topic");
        }

        Ok(Self {
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            kafka,
            worker: WorkerConfig::from_env(),
        })
    }
}
