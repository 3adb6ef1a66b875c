// ============================================================================
// Commit Router
// ============================================================================
//
// One task per topic. Workers finish messages in any order; the router
// turns those completions back into broker commits that only ever cover
// a contiguous, gap-free prefix of the topic's arrival order.
//
// State:
// - pending:   dispatched-but-unconfirmed sequence ids, ascending. Shared
//              with the dispatch loop (it appends, the router pops).
// - completed: sequence id -> broker handle. Owned by this task alone.
//
// On every completion the router pops ids from the front of `pending`
// while they are completed, then issues ONE broker commit for the popped
// run. Intermediate offsets are implied by the highest one per partition.
//
// ============================================================================

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info};

use super::broker::{BrokerClient, BrokerHandle};
use super::message::Completed;
use super::metrics;
use super::shutdown::{ShutdownCoordinator, ShutdownReason};

/// Dispatched-but-unconfirmed sequence ids of one topic.
pub(crate) type PendingIds = Arc<Mutex<VecDeque<u64>>>;

/// Result of advancing the contiguous completed prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PrefixAdvance {
    /// Highest sequence id now covered
    pub highest: u64,
    /// Number of ids popped off `pending`
    pub popped: usize,
    /// Highest handle per partition touched by the popped ids
    pub handles: Vec<BrokerHandle>,
}

/// Pop the completed prefix of `pending`.
///
/// Stops at the first id that has not completed yet. Returns `None` when
/// the front of `pending` is still outstanding.
pub(crate) fn advance_prefix(
    pending: &mut VecDeque<u64>,
    completed: &mut HashMap<u64, BrokerHandle>,
) -> Option<PrefixAdvance> {
    let mut highest = None;
    let mut popped = 0;
    let mut per_partition: BTreeMap<i32, BrokerHandle> = BTreeMap::new();

    while let Some(&front) = pending.front() {
        let Some(handle) = completed.remove(&front) else {
            break;
        };
        pending.pop_front();
        popped += 1;
        highest = Some(front);
        // Ids pop in ascending order, so the last write wins per partition
        per_partition.insert(handle.partition(), handle);
    }

    highest.map(|highest| PrefixAdvance {
        highest,
        popped,
        handles: per_partition.into_values().collect(),
    })
}

/// Per-topic commit router.
pub(crate) struct TopicRouter {
    topic: Arc<str>,
    pending: PendingIds,
    completed: HashMap<u64, BrokerHandle>,
    rx: mpsc::Receiver<Completed>,
    broker: Arc<dyn BrokerClient>,
    debug: bool,
}

impl TopicRouter {
    pub(crate) fn new(
        topic: Arc<str>,
        pending: PendingIds,
        rx: mpsc::Receiver<Completed>,
        broker: Arc<dyn BrokerClient>,
        debug: bool,
    ) -> Self {
        Self {
            topic,
            pending,
            completed: HashMap::new(),
            rx,
            broker,
            debug,
        }
    }

    /// Route completions until shutdown or a commit failure.
    ///
    /// Returns itself so the shutdown coordinator can run the final flush.
    pub(crate) async fn run(mut self, shutdown: Arc<ShutdownCoordinator>) -> Self {
        let token = shutdown.token();

        loop {
            let completed = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(completed) => completed,
                    None => break,
                },
            };

            self.completed.insert(completed.sequence_id, completed.handle);

            if let Err(e) = self.commit_ready().await {
                error!(
                    topic = %self.topic,
                    error = %format!("{e:#}"),
                    "Offset commit failed, in-memory and broker state would diverge"
                );
                shutdown.trigger(ShutdownReason::CommitFailed {
                    topic: self.topic.to_string(),
                });
                break;
            }
        }

        debug!(topic = %self.topic, "Commit router stopped");
        self
    }

    /// One last advance-and-commit after the router has stopped.
    ///
    /// Completions that were queued before the commit queue closed are
    /// absorbed first. Errors are logged only: the process is going down.
    pub(crate) async fn final_flush(mut self) {
        // Returns None only once no sender holds a reserved slot
        self.rx.close();
        while let Some(completed) = self.rx.recv().await {
            self.completed.insert(completed.sequence_id, completed.handle);
        }

        match self.commit_ready().await {
            Ok(Some(highest)) => info!(
                topic = %self.topic,
                sequence_id = highest,
                "Flushed completed prefix on shutdown"
            ),
            Ok(None) => {}
            Err(e) => error!(
                topic = %self.topic,
                error = %format!("{e:#}"),
                "Final offset commit failed on shutdown"
            ),
        }

        if !self.completed.is_empty() {
            info!(
                topic = %self.topic,
                stranded = self.completed.len(),
                "Completed messages behind a gap stay uncommitted and will be redelivered"
            );
        }
    }

    /// Advance the prefix and commit it. Returns the highest committed id.
    async fn commit_ready(&mut self) -> Result<Option<u64>> {
        let advance = {
            let mut pending = self.pending.lock().await;
            let advance = advance_prefix(&mut pending, &mut self.completed);
            metrics::KAFKA_PENDING
                .with_label_values(&[&*self.topic])
                .set(pending.len() as i64);
            advance
        };

        let Some(advance) = advance else {
            return Ok(None);
        };

        if let Err(e) = self
            .broker
            .commit(&advance.handles)
            .await
            .with_context(|| format!("Failed to commit offsets for topic '{}'", self.topic))
        {
            metrics::KAFKA_COMMIT_FAILURE
                .with_label_values(&[&*self.topic])
                .inc();
            return Err(e);
        }

        metrics::KAFKA_COMMIT_SUCCESS
            .with_label_values(&[&*self.topic])
            .inc();

        if self.debug {
            debug!(
                topic = %self.topic,
                sequence_id = advance.highest,
                popped = advance.popped,
                partitions = advance.handles.len(),
                "Committed contiguous prefix"
            );
        }

        Ok(Some(advance.highest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::broker::FetchedRecord;

    /// Broker that only records commit calls.
    #[derive(Default)]
    struct RecordingBroker {
        commits: std::sync::Mutex<Vec<Vec<BrokerHandle>>>,
    }

    #[async_trait::async_trait]
    impl BrokerClient for RecordingBroker {
        async fn fetch(&self, _max_records: usize) -> Result<Vec<FetchedRecord>> {
            Ok(Vec::new())
        }

        async fn commit(&self, handles: &[BrokerHandle]) -> Result<()> {
            self.commits.lock().unwrap().push(handles.to_vec());
            Ok(())
        }
    }

    fn completed(sequence_id: u64, offset: i64) -> Completed {
        Completed {
            sequence_id,
            handle: BrokerHandle::new("orders", 0, offset),
        }
    }

    /// Simulate a router over `ids`, completing them in `order`.
    /// Returns the highest sequence id of every commit issued.
    fn commits_for(ids: &[u64], order: &[u64]) -> Vec<u64> {
        let mut pending: VecDeque<u64> = ids.iter().copied().collect();
        let mut completed = HashMap::new();
        let mut commits = Vec::new();

        for &id in order {
            completed.insert(id, BrokerHandle::new("orders", 0, id as i64));
            if let Some(advance) = advance_prefix(&mut pending, &mut completed) {
                assert_eq!(advance.handles.len(), 1);
                assert_eq!(advance.handles[0].offset(), advance.highest as i64);
                commits.push(advance.highest);
            }
        }
        commits
    }

    #[test]
    fn test_out_of_order_completions_commit_in_order() {
        let commits = commits_for(&[1, 2, 3, 4, 5], &[3, 1, 2, 5, 4]);
        // 1 alone advances, 2 releases the already-completed 3, 4 releases 5
        assert_eq!(commits, vec![1, 3, 5]);
    }

    #[test]
    fn test_reverse_order_commits_once() {
        let commits = commits_for(&[1, 2, 3, 4, 5], &[5, 4, 3, 2, 1]);
        assert_eq!(commits, vec![5]);
    }

    #[test]
    fn test_gap_blocks_later_ids() {
        let mut pending: VecDeque<u64> = (1..=5).collect();
        let mut completed = HashMap::new();

        for id in 2..=5 {
            completed.insert(id, BrokerHandle::new("orders", 0, id as i64));
            assert!(advance_prefix(&mut pending, &mut completed).is_none());
        }

        // Nothing popped while 1 is outstanding
        assert_eq!(pending.len(), 5);
        assert_eq!(completed.len(), 4);
    }

    #[test]
    fn test_ids_leave_pending_exactly_once() {
        let mut pending: VecDeque<u64> = (1..=3).collect();
        let mut completed = HashMap::new();
        completed.insert(1, BrokerHandle::new("orders", 0, 10));
        completed.insert(2, BrokerHandle::new("orders", 0, 11));

        let advance = advance_prefix(&mut pending, &mut completed).unwrap();
        assert_eq!(advance.highest, 2);
        assert_eq!(advance.popped, 2);
        assert_eq!(pending, VecDeque::from(vec![3]));
        assert!(completed.is_empty());

        // Nothing more to advance
        assert!(advance_prefix(&mut pending, &mut completed).is_none());
    }

    #[test]
    fn test_one_handle_per_partition_in_prefix() {
        let mut pending: VecDeque<u64> = (1..=4).collect();
        let mut completed = HashMap::new();
        completed.insert(1, BrokerHandle::new("orders", 0, 100));
        completed.insert(2, BrokerHandle::new("orders", 1, 7));
        completed.insert(3, BrokerHandle::new("orders", 0, 101));
        completed.insert(4, BrokerHandle::new("orders", 1, 8));

        let advance = advance_prefix(&mut pending, &mut completed).unwrap();
        assert_eq!(advance.highest, 4);
        assert_eq!(
            advance.handles,
            vec![
                BrokerHandle::new("orders", 0, 101),
                BrokerHandle::new("orders", 1, 8),
            ]
        );
    }

    #[test]
    fn test_every_permutation_of_four_never_skips_a_gap() {
        let ids = [1u64, 2, 3, 4];
        let mut order = ids.to_vec();
        // Heap's algorithm over all 24 orderings
        let mut c = [0usize; 4];
        let check = |order: &[u64]| {
            let commits = commits_for(&ids, order);
            let mut done = Vec::new();
            let mut next_commit = commits.iter();
            let mut expected_prefix = 0;
            for &id in order {
                done.push(id);
                let mut prefix = expected_prefix;
                while done.contains(&(prefix + 1)) {
                    prefix += 1;
                }
                if prefix > expected_prefix {
                    assert_eq!(next_commit.next(), Some(&prefix));
                    expected_prefix = prefix;
                }
            }
            assert!(next_commit.next().is_none());
            assert_eq!(expected_prefix, 4);
        };

        check(&order);
        let mut i = 0;
        while i < order.len() {
            if c[i] < i {
                if i % 2 == 0 {
                    order.swap(0, i);
                } else {
                    order.swap(c[i], i);
                }
                check(&order);
                c[i] += 1;
                i = 0;
            } else {
                c[i] = 0;
                i += 1;
            }
        }
    }

    #[tokio::test]
    async fn test_final_flush_absorbs_commit_with_reserved_slot() {
        let broker = Arc::new(RecordingBroker::default());
        let pending: PendingIds = Arc::new(Mutex::new((1..=2).collect()));
        let (tx, rx) = mpsc::channel(4);
        let router = TopicRouter::new(
            Arc::from("orders"),
            pending.clone(),
            rx,
            broker.clone(),
            false,
        );

        tx.send(completed(1, 10)).await.unwrap();
        // Slot reserved before the flush closes the queue, filled after
        let permit = tx.reserve().await.unwrap();
        let flush = tokio::spawn(router.final_flush());
        tokio::task::yield_now().await;
        permit.send(completed(2, 11));
        drop(tx);

        flush.await.unwrap();

        assert_eq!(
            *broker.commits.lock().unwrap(),
            vec![vec![BrokerHandle::new("orders", 0, 11)]]
        );
        assert!(pending.lock().await.is_empty());
    }
}
