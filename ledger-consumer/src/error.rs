use ledger_common::store::StoreError;
use rdkafka::error::KafkaError;
use thiserror::Error;

/// Enumeration of errors returned by a `MessageSource` when fetching.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The source will never return another message. Not a failure: the loop stops cleanly.
    #[error("message source is closed")]
    Closed,
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
}

/// Enumeration of errors returned when acknowledging or releasing a delivery.
#[derive(Error, Debug)]
pub enum AckError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("consumer gone")]
    Gone,
}

#[derive(Error, Debug)]
pub enum DeadLetterError {
    #[error("failed to produce dead letter: {0}")]
    Kafka(#[from] KafkaError),
    #[error("dead letter sink unavailable: {0}")]
    Unavailable(String),
}

/// Enumeration of errors that stop the consumer process from starting.
/// Once ingestion is running nothing is fatal.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("invalid configuration: {0}")]
    ConfigError(#[from] envconfig::Error),
    #[error("failed to connect to the store: {0}")]
    StoreError(#[from] StoreError),
    #[error("failed to create Kafka client: {0}")]
    KafkaError(#[from] KafkaError),
    #[error("failed to create dead letter producer: {0}")]
    DeadLetterError(#[from] DeadLetterError),
    #[error("failed to install metrics recorder: {0}")]
    MetricsError(#[from] metrics_exporter_prometheus::BuildError),
    #[error("health server failed: {0}")]
    ServerError(#[from] std::io::Error),
}
