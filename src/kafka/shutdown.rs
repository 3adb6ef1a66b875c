// ============================================================================
// Shutdown Coordinator
// ============================================================================
//
// Reachable from every component. Triggers:
// - caller closes the consumer / cancels the outer context  (graceful)
// - fetch failure, commit failure, deadman stall             (fatal)
//
// Only the first trigger runs the procedure:
// 1. cancel the shared token (dispatch, routers and pending commits stop)
// 2. close the output queue and discard undelivered messages
//    (never committed, so the broker redelivers them on restart)
// 3. wait for the dispatch task, then give every topic one final
//    advance-and-commit pass
// 4. on a fatal trigger, hand over to the fatal hook, which terminates the
//    process by default so the supervisor restarts it from the last commit
//
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::message::Message;
use super::metrics;
use super::router::TopicRouter;

/// Why the engine is shutting down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The caller closed the consumer
    Requested,
    /// The caller's context was cancelled
    Cancelled,
    /// The broker fetch call failed
    FetchFailed,
    /// A broker commit call failed
    CommitFailed { topic: String },
    /// No worker took a message within the deadman timeout
    Stalled { topic: String },
}

impl ShutdownReason {
    /// Fatal reasons end with process termination.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::FetchFailed | Self::CommitFailed { .. } | Self::Stalled { .. }
        )
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "close requested"),
            Self::Cancelled => write!(f, "context cancelled"),
            Self::FetchFailed => write!(f, "fetch failed"),
            Self::CommitFailed { topic } => write!(f, "commit failed on topic '{topic}'"),
            Self::Stalled { topic } => write!(f, "dispatch stalled on topic '{topic}'"),
        }
    }
}

/// Invoked once a fatal shutdown has flushed everything it could.
pub type FatalHook = Arc<dyn Fn(&ShutdownReason) + Send + Sync>;

/// Default fatal hook: exit so the orchestrator restarts the process.
pub fn exit_process() -> FatalHook {
    Arc::new(|reason: &ShutdownReason| {
        error!(
            reason = %reason,
            "Terminating process, restart resumes from the last committed offsets"
        );
        std::process::exit(1);
    })
}

/// Tasks the procedure waits for.
pub(crate) struct EngineTasks {
    pub dispatcher: JoinHandle<()>,
    pub routers: Vec<JoinHandle<TopicRouter>>,
}

pub(crate) struct ShutdownCoordinator {
    triggered: AtomicBool,
    token: CancellationToken,
    finished: CancellationToken,
    output: async_channel::Receiver<Message>,
    tasks: Mutex<Option<EngineTasks>>,
    on_fatal: FatalHook,
}

impl ShutdownCoordinator {
    pub(crate) fn new(
        token: CancellationToken,
        output: async_channel::Receiver<Message>,
        on_fatal: FatalHook,
    ) -> Self {
        Self {
            triggered: AtomicBool::new(false),
            token,
            finished: CancellationToken::new(),
            output,
            tasks: Mutex::new(None),
            on_fatal,
        }
    }

    /// Shared cancellation token of the engine.
    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub(crate) fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Wait until the shutdown procedure has completed.
    pub(crate) async fn finished(&self) {
        self.finished.cancelled().await;
    }

    /// Spawn the engine tasks while holding the task slot, so a trigger
    /// racing with startup still sees every task.
    pub(crate) fn install_tasks(&self, spawn: impl FnOnce() -> EngineTasks) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        *tasks = Some(spawn());
    }

    /// Start shutting down. Idempotent: only the first call has an effect.
    ///
    /// Never waits for the procedure itself, so any engine task may call it.
    pub(crate) fn trigger(self: &Arc<Self>, reason: ShutdownReason) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            debug!(reason = %reason, "Shutdown already in progress");
            return;
        }

        if reason.is_failure() {
            error!(reason = %reason, "Fatal stream error, shutting down");
        } else {
            info!(reason = %reason, "Shutting down stream consumer");
        }

        self.token.cancel();

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(reason).await });
    }

    async fn run(&self, reason: ShutdownReason) {
        self.output.close();
        let mut discarded = 0u64;
        while let Ok(message) = self.output.try_recv() {
            drop(message);
            discarded += 1;
        }
        if discarded > 0 {
            metrics::KAFKA_DISCARDED_ON_SHUTDOWN.inc_by(discarded);
            warn!(
                discarded = discarded,
                "Discarded undelivered messages, they will be redelivered"
            );
        }

        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(tasks) = tasks {
            if let Err(e) = tasks.dispatcher.await {
                error!(error = %e, "Dispatch task ended abnormally");
            }

            for router in tasks.routers {
                match router.await {
                    Ok(router) => router.final_flush().await,
                    Err(e) => error!(error = %e, "Commit router ended abnormally"),
                }
            }
        }

        if reason.is_failure() {
            (self.on_fatal)(&reason);
        }

        info!(reason = %reason, "Stream consumer shut down");
        self.finished.cancel();
    }
}

/// Returned by `start_consuming`; stops the consumer gracefully.
#[derive(Clone)]
pub struct CloseHandle {
    coordinator: Arc<ShutdownCoordinator>,
}

impl CloseHandle {
    pub(crate) fn new(coordinator: Arc<ShutdownCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Graceful shutdown: stop intake, flush completed prefixes, then return.
    pub async fn close(&self) {
        self.coordinator.trigger(ShutdownReason::Requested);
        self.coordinator.finished().await;
    }

    /// Wait for shutdown to finish, whatever triggered it.
    pub async fn closed(&self) {
        self.coordinator.finished().await;
    }

    pub fn is_closed(&self) -> bool {
        self.coordinator.is_finished()
    }
}
