use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use construct_config::KafkaConfig;
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::broker::{BrokerClient, FetchedRecord};
use super::config::validate_consumer_config;
use super::error::{StreamError, StreamResult};
use super::kafka_broker::KafkaBroker;
use super::message::{Completed, Message};
use super::metrics;
use super::router::{PendingIds, TopicRouter};
use super::shutdown::{
    CloseHandle, EngineTasks, FatalHook, ShutdownCoordinator, ShutdownReason, exit_process,
};

/// Shared output queue. Clone it into as many worker tasks as needed;
/// `recv()` fails once the consumer has shut down and the queue is empty.
pub type MessageStream = async_channel::Receiver<Message>;

/// Stand-in for a disabled deadman timer.
const DEADMAN_DISABLED: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Ordered-commit Kafka consumer.
///
/// Many workers process messages concurrently and in any order, while each
/// topic's committed offset only ever covers a gap-free prefix of arrival
/// order. A crash before a message's commit means redelivery (at-least-once),
/// so processing must be idempotent.
///
/// Fetch failures, commit failures and dispatch stalls are fatal: the
/// consumer flushes what it safely can and terminates the process so the
/// supervisor restarts it from the last committed offsets.
pub struct Consumer {
    config: KafkaConfig,
    broker: Arc<dyn BrokerClient>,
    consuming: AtomicBool,
    coordinator: OnceLock<Arc<ShutdownCoordinator>>,
    on_fatal: FatalHook,
}

impl Consumer {
    /// Create a consumer on top of any broker client.
    ///
    /// # Returns
    /// * `Err(StreamError::Config)` - invalid brokers, group, topics or tuning
    pub fn new(config: &KafkaConfig, broker: Arc<dyn BrokerClient>) -> StreamResult<Self> {
        validate_consumer_config(config)?;

        Ok(Self {
            config: config.clone(),
            broker,
            consuming: AtomicBool::new(false),
            coordinator: OnceLock::new(),
            on_fatal: exit_process(),
        })
    }

    /// Create a consumer connected to Kafka and subscribed to every topic.
    pub fn connect(config: &KafkaConfig) -> StreamResult<Self> {
        validate_consumer_config(config)?;

        info!("Initializing ordered-commit Kafka consumer");
        info!("Brokers: {}", config.bootstrap_servers());
        info!("Topics: {}", config.topics.join(","));
        info!("Consumer Group: {}", config.consumer_group);

        let broker = KafkaBroker::new(config)
            .map_err(|e| StreamError::config(format!("{e:#}")))?;

        Self::new(config, Arc::new(broker))
    }

    /// Replace the fatal hook (process exit by default).
    pub fn with_fatal_hook(mut self, on_fatal: FatalHook) -> Self {
        self.on_fatal = on_fatal;
        self
    }

    /// Spawn the dispatch loop and one commit router per topic.
    ///
    /// Cancelling `ctx` shuts the consumer down gracefully, as does
    /// [`CloseHandle::close`]. Must be called from within a Tokio runtime.
    ///
    /// # Returns
    /// * `Err(StreamError::Config)` - already started, or `ctx` is already
    ///   cancelled. Nothing is spawned in either case.
    pub fn start_consuming(
        &self,
        ctx: &CancellationToken,
    ) -> StreamResult<(MessageStream, CloseHandle)> {
        if ctx.is_cancelled() {
            return Err(StreamError::config("context is already cancelled"));
        }
        if self
            .consuming
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StreamError::config("consumer has already been started"));
        }

        let tuning = &self.config.consumer;
        let (output_tx, output_rx) = async_channel::bounded(tuning.output_queue_capacity);
        let coordinator = Arc::new(ShutdownCoordinator::new(
            ctx.child_token(),
            output_rx.clone(),
            self.on_fatal.clone(),
        ));

        let mut slots = HashMap::with_capacity(self.config.topics.len());
        let mut routers = Vec::with_capacity(self.config.topics.len());
        for name in &self.config.topics {
            let topic: Arc<str> = Arc::from(name.as_str());
            let pending = PendingIds::default();
            let (commit_tx, commit_rx) = mpsc::channel(tuning.commit_queue_capacity);

            routers.push(TopicRouter::new(
                topic.clone(),
                pending.clone(),
                commit_rx,
                self.broker.clone(),
                tuning.debug,
            ));
            slots.insert(
                name.clone(),
                TopicSlot {
                    topic,
                    pending,
                    commit_tx,
                },
            );
        }

        let dispatcher = Dispatcher {
            broker: self.broker.clone(),
            slots,
            output: output_tx,
            token: coordinator.token(),
            shutdown: coordinator.clone(),
            next_sequence_id: 0,
            fetch_batch_size: tuning.fetch_batch_size,
            deadman: tuning.deadman_timeout().unwrap_or(DEADMAN_DISABLED),
            debug: tuning.debug,
        };

        coordinator.install_tasks(|| EngineTasks {
            routers: routers
                .into_iter()
                .map(|router| tokio::spawn(router.run(coordinator.clone())))
                .collect(),
            dispatcher: tokio::spawn(dispatcher.run()),
        });
        let _ = self.coordinator.set(coordinator.clone());

        info!(
            topics = self.config.topics.len(),
            group = %self.config.consumer_group,
            fetch_batch_size = tuning.fetch_batch_size,
            deadman_ms = tuning.deadman_timeout_ms,
            "Stream consumer started"
        );

        Ok((output_rx, CloseHandle::new(coordinator)))
    }

    pub fn is_consuming(&self) -> bool {
        self.consuming.load(Ordering::SeqCst)
    }

    /// True once any shutdown trigger has fired.
    pub fn is_shutting_down(&self) -> bool {
        self.coordinator
            .get()
            .is_some_and(|coordinator| coordinator.is_triggered())
    }
}

/// Dispatch-side view of one registered topic.
struct TopicSlot {
    topic: Arc<str>,
    pending: PendingIds,
    commit_tx: mpsc::Sender<Completed>,
}

/// The single fetch/dispatch task.
struct Dispatcher {
    broker: Arc<dyn BrokerClient>,
    slots: HashMap<String, TopicSlot>,
    output: async_channel::Sender<Message>,
    token: CancellationToken,
    shutdown: Arc<ShutdownCoordinator>,
    next_sequence_id: u64,
    fetch_batch_size: usize,
    deadman: Duration,
    debug: bool,
}

impl Dispatcher {
    async fn run(mut self) {
        let reason = self.dispatch_loop().await;
        self.shutdown.trigger(reason);
        debug!(
            last_sequence_id = self.next_sequence_id,
            "Dispatch loop stopped"
        );
    }

    /// Fetch and dispatch until something stops the loop.
    async fn dispatch_loop(&mut self) -> ShutdownReason {
        loop {
            let fetched = tokio::select! {
                biased;
                _ = self.token.cancelled() => return ShutdownReason::Cancelled,
                fetched = self.broker.fetch(self.fetch_batch_size) => fetched,
            };

            let records = match fetched {
                Ok(records) => records,
                Err(e) => {
                    metrics::KAFKA_FETCH_FAILURE.inc();
                    error!(error = %format!("{e:#}"), "Failed to fetch records from Kafka");
                    return ShutdownReason::FetchFailed;
                }
            };

            for record in records {
                if let Err(reason) = self.dispatch(record).await {
                    return reason;
                }
            }
        }
    }

    /// Register one record as pending and hand it to the output queue.
    async fn dispatch(&mut self, record: FetchedRecord) -> Result<(), ShutdownReason> {
        let Some(slot) = self.slots.get(&record.topic) else {
            metrics::KAFKA_MALFORMED.inc();
            warn!(
                topic = %record.topic,
                partition = record.handle.partition(),
                offset = record.handle.offset(),
                "Skipping record from unregistered topic"
            );
            return Ok(());
        };

        self.next_sequence_id += 1;
        let sequence_id = self.next_sequence_id;

        {
            let mut pending = slot.pending.lock().await;
            pending.push_back(sequence_id);
            metrics::KAFKA_PENDING
                .with_label_values(&[&*slot.topic])
                .set(pending.len() as i64);
        }

        let partition = record.handle.partition();
        let offset = record.handle.offset();
        let message = Message::new(
            sequence_id,
            slot.topic.clone(),
            record.payload,
            record.handle,
            slot.commit_tx.clone(),
            self.token.clone(),
        );

        // The deadman timer restarts for every push attempt
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(ShutdownReason::Cancelled),
            sent = time::timeout(self.deadman, self.output.send(message)) => match sent {
                Ok(Ok(())) => {
                    metrics::KAFKA_DISPATCHED
                        .with_label_values(&[&*slot.topic])
                        .inc();
                    if self.debug {
                        debug!(
                            topic = %slot.topic,
                            sequence_id = sequence_id,
                            partition = partition,
                            offset = offset,
                            "Dispatched message"
                        );
                    }
                    Ok(())
                }
                // Output queue closed by the shutdown procedure
                Ok(Err(_)) => Err(ShutdownReason::Cancelled),
                Err(_) => {
                    metrics::KAFKA_DISPATCH_STALLS.inc();
                    error!(
                        topic = %slot.topic,
                        sequence_id = sequence_id,
                        deadman_ms = self.deadman.as_millis() as u64,
                        "No worker accepted a message before the deadman timeout"
                    );
                    Err(ShutdownReason::Stalled {
                        topic: slot.topic.to_string(),
                    })
                }
            },
        }
    }
}
