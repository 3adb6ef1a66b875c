// ============================================================================
// construct-stream
// ============================================================================
//
// Ordered-commit Kafka consumption for worker fleets. See `kafka` for the
// engine; `construct_config` carries the environment-driven settings.
//
// ============================================================================

pub mod kafka;

pub use construct_config;
pub use kafka::{
    CloseHandle, Consumer, Message, MessageProducer, MessageStream, ShutdownReason, StreamError,
    StreamResult,
};
