use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::broker::BrokerHandle;
use super::error::{StreamError, StreamResult};

/// Completion notice sent from a worker to its topic's commit router.
#[derive(Debug)]
pub(crate) struct Completed {
    pub sequence_id: u64,
    pub handle: BrokerHandle,
}

/// A fetched message handed to exactly one worker.
///
/// Processing must be idempotent: if the process dies before [`Message::commit`]
/// the broker redelivers the message (at-least-once).
#[derive(Debug)]
pub struct Message {
    sequence_id: u64,
    topic: Arc<str>,
    payload: Option<Bytes>,
    handle: BrokerHandle,
    // Send-only capability into this topic's commit router
    commit_tx: mpsc::Sender<Completed>,
    shutdown: CancellationToken,
}

impl Message {
    pub(crate) fn new(
        sequence_id: u64,
        topic: Arc<str>,
        payload: Option<Bytes>,
        handle: BrokerHandle,
        commit_tx: mpsc::Sender<Completed>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            sequence_id,
            topic,
            payload,
            handle,
            commit_tx,
            shutdown,
        }
    }

    /// Process-wide arrival order of this message.
    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Message payload.
    ///
    /// A message without a value yields an empty slice instead of failing.
    pub fn data(&self) -> &[u8] {
        match &self.payload {
            Some(payload) => &payload[..],
            None => {
                warn!(
                    topic = %self.topic,
                    sequence_id = self.sequence_id,
                    "Message has no payload, returning empty data"
                );
                &[]
            }
        }
    }

    /// Hand the message back for an in-order offset commit.
    ///
    /// Returns once the topic's commit router has accepted it. The broker
    /// commit itself happens later, as soon as every earlier message of the
    /// topic has been committed too.
    ///
    /// # Returns
    /// * `Ok(())` - queued for commit
    /// * `Err(StreamError::ShuttingDown)` - the engine is shutting down and
    ///   the message was NOT committed
    pub async fn commit(self) -> StreamResult<()> {
        let completed = Completed {
            sequence_id: self.sequence_id,
            handle: self.handle,
        };

        tokio::select! {
            biased;
            sent = self.commit_tx.send(completed) => {
                sent.map_err(|_| StreamError::ShuttingDown)
            }
            _ = self.shutdown.cancelled() => Err(StreamError::ShuttingDown),
        }
    }
}
