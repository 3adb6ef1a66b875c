use thiserror::Error;

/// Errors surfaced to callers of the stream engine.
///
/// Fetch failures, commit failures and dispatch stalls never show up here:
/// they escalate to the shutdown coordinator instead.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Bad constructor arguments, double start, or an already-cancelled context.
    /// The consumer never starts.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The engine is shutting down; the message was NOT committed.
    #[error("Consumer is shutting down, message not committed")]
    ShuttingDown,

    /// The broker rejected or failed an operation on `topic`.
    #[error("Kafka error on topic '{topic}': {source}")]
    Kafka {
        topic: String,
        #[source]
        source: anyhow::Error,
    },
}

impl StreamError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True when the error only means "we are shutting down".
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, Self::ShuttingDown)
    }
}

pub type StreamResult<T> = Result<T, StreamError>;
