use std::collections::HashSet;

use anyhow::Result;
use construct_config::KafkaConfig;
use rdkafka::config::ClientConfig;
use tracing::info;

use super::error::{StreamError, StreamResult};

/// Creates a new `rdkafka::config::ClientConfig` from the application's `KafkaConfig`.
///
/// Shared by the consumer and the producer so both connect the same way:
/// - bootstrap servers from the seed list
/// - SSL/TLS when `ssl_enabled` is true (optional CA file)
/// - SASL when mechanism, username and password are all present
pub fn create_client_config(config: &KafkaConfig) -> Result<ClientConfig> {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", config.bootstrap_servers());

    if !config.enabled {
        // Placeholder clients never connect.
        return Ok(client_config);
    }

    // Default to plaintext if SSL is not explicitly enabled and no SASL.
    client_config.set("security.protocol", "plaintext");

    if config.ssl_enabled {
        info!("Enabling SSL/TLS for Kafka connection");
        client_config.set("security.protocol", "ssl");
        if let Some(ca) = &config.ssl_ca_location {
            client_config.set("ssl.ca.location", ca);
        }
    }

    if let (Some(mechanism), Some(username), Some(password)) = (
        &config.sasl_mechanism,
        &config.sasl_username,
        &config.sasl_password,
    ) {
        info!(sasl_mechanism = %mechanism, "Configuring SASL authentication");
        client_config
            .set("sasl.mechanism", mechanism)
            .set("sasl.username", username)
            .set("sasl.password", password);

        if config.ssl_enabled {
            client_config.set("security.protocol", "sasl_ssl");
        } else {
            client_config.set("security.protocol", "sasl_plaintext");
        }
    }

    Ok(client_config)
}

/// Client configuration for the ordered-commit consumer.
///
/// - `enable.auto.commit=false`: offsets move only through the commit routers.
/// - `auto.offset.reset=earliest`: read from the beginning on first start.
/// - `session.timeout.ms=30000` / `heartbeat.interval.ms=3000`.
/// - `debug=consumer,cgrp,topic,fetch` when the debug toggle is set.
pub(crate) fn consumer_client_config(config: &KafkaConfig) -> Result<ClientConfig> {
    let mut client_config = create_client_config(config)?;
    client_config
        .set("group.id", &config.consumer_group)
        // Offset management
        .set("enable.auto.commit", "false") // Commit routers own the offsets
        .set("auto.offset.reset", "earliest") // Read from beginning
        // Performance
        .set("fetch.min.bytes", "1")
        .set("fetch.wait.max.ms", "500") // Max wait for fetch
        .set("max.partition.fetch.bytes", "1048576") // 1MB
        // Session management
        .set("session.timeout.ms", "30000") // 30s timeout
        .set("heartbeat.interval.ms", "3000") // 3s heartbeat
        .set("max.poll.interval.ms", "300000"); // 5min max processing time

    if config.consumer.debug {
        client_config.set("debug", "consumer,cgrp,topic,fetch");
    }

    Ok(client_config)
}

/// Validate the constructor parameters of a consumer.
pub fn validate_consumer_config(config: &KafkaConfig) -> StreamResult<()> {
    if config.brokers.is_empty() {
        return Err(StreamError::config("at least one seed broker is required"));
    }
    if config.brokers.iter().any(|b| b.trim().is_empty()) {
        return Err(StreamError::config("seed broker addresses must not be blank"));
    }
    if config.consumer_group.trim().is_empty() {
        return Err(StreamError::config("consumer group must not be empty"));
    }
    if config.topics.is_empty() {
        return Err(StreamError::config("at least one topic is required"));
    }

    let mut seen = HashSet::with_capacity(config.topics.len());
    for topic in &config.topics {
        if topic.trim().is_empty() {
            return Err(StreamError::config("topic names must not be blank"));
        }
        if !seen.insert(topic.as_str()) {
            return Err(StreamError::config(format!("duplicate topic '{topic}'")));
        }
    }

    let tuning = &config.consumer;
    if tuning.commit_queue_capacity == 0 {
        return Err(StreamError::config("commit queue capacity must be at least 1"));
    }
    if tuning.output_queue_capacity == 0 {
        return Err(StreamError::config("output queue capacity must be at least 1"));
    }
    if tuning.fetch_batch_size == 0 {
        return Err(StreamError::config("fetch batch size must be at least 1"));
    }

    Ok(())
}
