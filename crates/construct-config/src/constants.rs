// ============================================================================
// Configuration Constants
// ============================================================================

// Back-pressure depths
pub(crate) const DEFAULT_COMMIT_QUEUE_CAPACITY: usize = 128;
pub(crate) const DEFAULT_OUTPUT_QUEUE_CAPACITY: usize = 128;

// Records pulled from the broker per fetch call
pub(crate) const DEFAULT_FETCH_BATCH_SIZE: usize = 100;

// 0 disables the deadman timer on the dispatch path
pub(crate) const DEFAULT_DEADMAN_TIMEOUT_MS: u64 = 0;

// 0 means "no limit"; the engine does not enforce this value
pub(crate) const DEFAULT_MAX_UNCOMMITTED_RECORDS: usize = 0;

// Worker tasks spawned by the stream worker binary
pub(crate) const DEFAULT_WORKER_CONCURRENCY: usize = 8;
