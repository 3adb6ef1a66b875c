use once_cell::sync::Lazy;
use prometheus::{
    Histogram, IntCounter, IntCounterVec, IntGaugeVec, opts, register_histogram,
    register_int_counter, register_int_counter_vec, register_int_gauge_vec,
};

// ============================================================================
// Consumer Metrics
// ============================================================================

/// Records handed to the output queue, per topic
pub static KAFKA_DISPATCHED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "kafka_consume_dispatched_total",
            "Total number of Kafka records handed to workers"
        ),
        &["topic"]
    )
    .expect("Failed to register kafka_consume_dispatched_total metric")
});

/// Records skipped because they could not be routed to a registered topic
pub static KAFKA_MALFORMED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "kafka_consume_malformed_total",
        "Total number of fetched records skipped as malformed"
    ))
    .expect("Failed to register kafka_consume_malformed_total metric")
});

/// Broker commit calls that succeeded, per topic
pub static KAFKA_COMMIT_SUCCESS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "kafka_commit_success_total",
            "Total number of successful Kafka offset commits"
        ),
        &["topic"]
    )
    .expect("Failed to register kafka_commit_success_total metric")
});

/// Broker commit calls that failed, per topic
pub static KAFKA_COMMIT_FAILURE: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "kafka_commit_failure_total",
            "Total number of failed Kafka offset commits"
        ),
        &["topic"]
    )
    .expect("Failed to register kafka_commit_failure_total metric")
});

/// Dispatched-but-unconfirmed sequence ids, per topic
pub static KAFKA_PENDING: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        opts!(
            "kafka_consume_pending",
            "Dispatched Kafka records not yet covered by a commit"
        ),
        &["topic"]
    )
    .expect("Failed to register kafka_consume_pending metric")
});

/// Fetch calls that failed
pub static KAFKA_FETCH_FAILURE: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "kafka_fetch_failure_total",
        "Total number of failed Kafka fetch calls"
    ))
    .expect("Failed to register kafka_fetch_failure_total metric")
});

/// Deadman timer expirations on the dispatch path
pub static KAFKA_DISPATCH_STALLS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "kafka_dispatch_stall_total",
        "Total number of dispatch attempts that hit the deadman timeout"
    ))
    .expect("Failed to register kafka_dispatch_stall_total metric")
});

/// Messages fetched but never handed to a worker before shutdown
pub static KAFKA_DISCARDED_ON_SHUTDOWN: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "kafka_shutdown_discarded_total",
        "Total number of undelivered messages discarded during shutdown"
    ))
    .expect("Failed to register kafka_shutdown_discarded_total metric")
});

// ============================================================================
// Producer Metrics
// ============================================================================

/// Kafka producer success counter
pub static KAFKA_PRODUCE_SUCCESS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "kafka_produce_success_total",
        "Total number of successful Kafka produce operations"
    ))
    .expect("Failed to register kafka_produce_success_total metric")
});

/// Kafka producer failure counter
pub static KAFKA_PRODUCE_FAILURE: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "kafka_produce_failure_total",
        "Total number of failed Kafka produce operations"
    ))
    .expect("Failed to register kafka_produce_failure_total metric")
});

/// Kafka producer latency histogram
pub static KAFKA_PRODUCE_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "kafka_produce_latency_seconds",
        "Kafka produce operation latency in seconds",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register kafka_produce_latency_seconds metric")
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        // Just ensure metrics can be accessed without panicking
        KAFKA_DISPATCHED.with_label_values(&["orders"]).inc();
        KAFKA_MALFORMED.inc();
        KAFKA_COMMIT_SUCCESS.with_label_values(&["orders"]).inc();
        KAFKA_COMMIT_FAILURE.with_label_values(&["orders"]).inc();
        KAFKA_PENDING.with_label_values(&["orders"]).set(3);
        KAFKA_FETCH_FAILURE.inc();
        KAFKA_DISPATCH_STALLS.inc();
        KAFKA_DISCARDED_ON_SHUTDOWN.inc();
        KAFKA_PRODUCE_SUCCESS.inc();
        KAFKA_PRODUCE_FAILURE.inc();
        KAFKA_PRODUCE_LATENCY.observe(0.1);
    }
}
