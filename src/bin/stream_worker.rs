use anyhow::{Context, Result};
use construct_stream::construct_config::Config;
use construct_stream::{Consumer, Message, MessageStream};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let consumer =
        Consumer::connect(&config.kafka).context("Failed to create stream consumer")?;

    let ctx = CancellationToken::new();
    let (stream, close) = consumer
        .start_consuming(&ctx)
        .context("Failed to start stream consumer")?;

    info!("Stream Worker Started");
    info!("Topics: {}", config.kafka.topics.join(","));
    info!("Workers: {}", config.worker.concurrency);

    let workers: Vec<_> = (0..config.worker.concurrency)
        .map(|id| tokio::spawn(run_worker(id, stream.clone())))
        .collect();
    drop(stream);

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received. Shutting down...");
            close.close().await;
        }
        // Fatal shutdowns exit the process from inside the consumer
        _ = close.closed() => {}
    }

    for worker in workers {
        if let Err(e) = worker.await {
            error!(error = %e, "Worker task failed");
        }
    }

    info!("Stream Worker stopped");
    Ok(())
}

/// Reads messages until the consumer shuts down.
async fn run_worker(id: usize, stream: MessageStream) {
    while let Ok(message) = stream.recv().await {
        handle_message(id, &message);

        if let Err(e) = message.commit().await {
            // Not committed: redelivered after restart
            warn!(worker = id, error = %e, "Commit not accepted");
            break;
        }
    }
}

fn handle_message(id: usize, message: &Message) {
    info!(
        worker = id,
        topic = %message.topic(),
        sequence_id = message.sequence_id(),
        bytes = message.data().len(),
        "Processed message"
    );
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
