// Ordered-commit Kafka consumption engine
//
// Many workers process fetched messages concurrently and out of order, while
// offsets committed back to Kafka only ever advance over a contiguous,
// gap-free prefix of arrival order, per topic.
//
//   broker.fetch -> Dispatcher -> output queue -> workers (caller-owned)
//                                                    | Message::commit
//                                                    v
//                            broker.commit <- TopicRouter (one per topic)
//
// Fatal errors (fetch, commit, deadman stall) go through the shutdown
// coordinator, which flushes what is safe and exits the process.

pub mod broker;
pub mod config;
pub mod consumer;
pub mod error;
pub mod kafka_broker;
pub mod message;
pub mod metrics;
pub mod producer;
mod router;
pub mod shutdown;

// Re-export commonly used types
pub use broker::{BrokerClient, BrokerHandle, FetchedRecord};
pub use config::{create_client_config, validate_consumer_config};
pub use consumer::{Consumer, MessageStream};
pub use error::{StreamError, StreamResult};
pub use kafka_broker::KafkaBroker;
pub use message::Message;
pub use producer::MessageProducer;
pub use shutdown::{CloseHandle, FatalHook, ShutdownReason, exit_process};
