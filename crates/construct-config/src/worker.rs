// ============================================================================
// Worker Configuration
// ============================================================================

use crate::constants::DEFAULT_WORKER_CONCURRENCY;
use crate::kafka::env_parse;

/// Stream worker specific configuration
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Number of tasks reading from the consumer's output queue
    pub concurrency: usize,
}

impl WorkerConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            concurrency: env_parse("WORKER_CONCURRENCY", DEFAULT_WORKER_CONCURRENCY).max(1),
        }
    }
}
