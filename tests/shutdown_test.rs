
use std::time::Duration;

use construct_stream::{ShutdownReason, StreamError};
use tokio_util::sync::CancellationToken;

use test_utils::{FatalRecorder, MockBroker, consumer, receive, records, test_config, wait_for};

#[tokio::test]
async fn test_fetch_error_is_fatal() {
    let broker = MockBroker::new();
    broker.push_fetch_error();

    let fatal = FatalRecorder::default();
    let consumer = consumer(&test_config(&["orders"]), broker.clone(), &fatal);
    let (stream, close) = consumer.start_consuming(&CancellationToken::new()).unwrap();

    close.closed().await;

    assert_eq!(fatal.reasons(), vec![ShutdownReason::FetchFailed]);
    assert!(consumer.is_shutting_down());
    assert!(stream.recv().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_deadman_timeout_is_fatal() {
    let broker = MockBroker::new();
    broker.push_batch(records("orders", 0..3));

    let mut config = test_config(&["orders"]);
    config.consumer.output_queue_capacity = 1;
    config.consumer.deadman_timeout_ms = 50;

    let fatal = FatalRecorder::default();
    let consumer = consumer(&config, broker.clone(), &fatal);
    // Nobody reads the stream
    let (_stream, close) = consumer.start_consuming(&CancellationToken::new()).unwrap();

    tokio::time::timeout(Duration::from_secs(5), close.closed())
        .await
        .expect("stall was not detected");

    assert_eq!(
        fatal.reasons(),
        vec![ShutdownReason::Stalled {
            topic: "orders".to_string()
        }]
    );
    assert!(broker.commits().is_empty());
}

#[tokio::test]
async fn test_commit_failure_is_fatal() {
    let broker = MockBroker::new();
    broker.push_batch(records("orders", 0..2));
    broker.fail_commits();

    let fatal = FatalRecorder::default();
    let consumer = consumer(&test_config(&["orders"]), broker.clone(), &fatal);
    let (stream, close) = consumer.start_consuming(&CancellationToken::new()).unwrap();

    let mut messages = receive(&stream, 2).await;
    let second = messages.pop().unwrap();
    // Accepted by the router; the broker commit is what fails
    messages.pop().unwrap().commit().await.unwrap();

    close.closed().await;

    assert_eq!(
        fatal.reasons(),
        vec![ShutdownReason::CommitFailed {
            topic: "orders".to_string()
        }]
    );
    assert!(second.commit().await.unwrap_err().is_shutting_down());
}

#[tokio::test]
async fn test_close_is_graceful_and_idempotent() {
    let broker = MockBroker::new();
    broker.push_batch(records("orders", 0..4));

    let fatal = FatalRecorder::default();
    let consumer = consumer(&test_config(&["orders"]), broker.clone(), &fatal);
    let (stream, close) = consumer.start_consuming(&CancellationToken::new()).unwrap();

    receive(&stream, 1).await.remove(0).commit().await.unwrap();
    wait_for(|| !broker.commits().is_empty()).await;

    let other = close.clone();
    tokio::join!(close.close(), other.close());
    close.close().await;

    assert!(fatal.reasons().is_empty());
    assert_eq!(broker.committed_offsets("orders"), vec![0]);
    // Undelivered messages were discarded, not handed out
    assert!(stream.recv().await.is_err());
}

#[tokio::test]
async fn test_context_cancellation_stops_consumer() {
    let broker = MockBroker::new();
    broker.push_batch(records("orders", 0..2));

    let fatal = FatalRecorder::default();
    let consumer = consumer(&test_config(&["orders"]), broker.clone(), &fatal);
    let ctx = CancellationToken::new();
    let (stream, close) = consumer.start_consuming(&ctx).unwrap();

    let messages = receive(&stream, 2).await;
    for message in messages {
        message.commit().await.unwrap();
    }

    ctx.cancel();
    close.closed().await;

    assert!(fatal.reasons().is_empty());
    assert_eq!(broker.committed_offsets("orders").last(), Some(&1));
}

#[tokio::test]
async fn test_start_errors_leave_state_unchanged() {
    let broker = MockBroker::new();
    let fatal = FatalRecorder::default();
    let consumer = consumer(&test_config(&["orders"]), broker.clone(), &fatal);

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    assert!(matches!(
        consumer.start_consuming(&cancelled),
        Err(StreamError::Config(_))
    ));
    assert!(!consumer.is_consuming());

    let (_stream, close) = consumer.start_consuming(&CancellationToken::new()).unwrap();
    assert!(matches!(
        consumer.start_consuming(&CancellationToken::new()),
        Err(StreamError::Config(_))
    ));
    assert!(consumer.is_consuming());
    assert!(!consumer.is_shutting_down());

    close.close().await;

    // Not restartable after shutdown
    assert!(matches!(
        consumer.start_consuming(&CancellationToken::new()),
        Err(StreamError::Config(_))
    ));
}

#[tokio::test]
async fn test_blocked_commit_returns_shutting_down() {
    let broker = MockBroker::new();
    broker.push_batch(records("orders", 1..=3));

    let mut config = test_config(&["orders"]);
    config.consumer.commit_queue_capacity = 1;

    let fatal = FatalRecorder::default();
    let consumer = consumer(&config, broker.clone(), &fatal);
    let (stream, close) = consumer.start_consuming(&CancellationToken::new()).unwrap();

    let messages = receive(&stream, 3).await;
    let commits: Vec<_> = messages
        .into_iter()
        .map(|message| tokio::spawn(message.commit()))
        .collect();

    close.close().await;

    // Every commit finished, either accepted or refused
    for commit in commits {
        let result = tokio::time::timeout(Duration::from_secs(5), commit)
            .await
            .expect("commit blocked after shutdown")
            .unwrap();
        if let Err(e) = result {
            assert!(e.is_shutting_down());
        }
    }
}

#[test]
fn test_invalid_config_is_rejected() {
    let broker = MockBroker::new();
    let mut config = test_config(&["orders", "orders"]);

    let err = construct_stream::Consumer::new(&config, broker.clone())
        .err()
        .unwrap();
    assert!(matches!(err, StreamError::Config(_)));

    config.topics = vec!["orders".to_string()];
    config.brokers.clear();
    assert!(construct_stream::Consumer::new(&config, broker).is_err());
}
