//! # Dead letters
//!
//! Where a message goes once it has used up its persist attempts, if a dead-letter topic is
//! configured. Only persistence failures end up here: malformed and invalid messages are dropped
//! at the source.
use async_trait::async_trait;
use ledger_common::health::HealthHandle;
use rdkafka::{
    message::{Header, OwnedHeaders},
    producer::{FutureProducer, FutureRecord, Producer},
    util::Timeout,
    ClientConfig,
};
use tracing::{debug, error, info};

use crate::config::KafkaConfig;
use crate::error::DeadLetterError;
use crate::kafka::KafkaContext;
use crate::source::Position;

/// A message that could not be stored, with enough context to replay it by hand.
#[derive(Debug, Clone, Copy)]
pub struct DeadLetter<'a> {
    pub payload: Option<&'a [u8]>,
    pub position: Position,
    pub dedup_key: &'a str,
    pub attempts: u32,
    pub error: &'a str,
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Returns once the dead letter is durably handed off.
    async fn send(&self, letter: DeadLetter<'_>) -> Result<(), DeadLetterError>;
}

pub struct KafkaDeadLetterSink {
    producer: FutureProducer<KafkaContext>,
    topic: String,
    timeout: Timeout,
}

impl KafkaDeadLetterSink {
    pub fn new(
        config: &KafkaConfig,
        topic: &str,
        liveness: HealthHandle,
    ) -> Result<Self, DeadLetterError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            )
            .set(
                "compression.codec",
                config.kafka_compression_codec.to_owned(),
            )
            .set("enable.idempotence", "true");

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka configuration: {:?}", client_config);
        let producer: FutureProducer<KafkaContext> =
            client_config.create_with_context(liveness.into())?;

        // "Ping" the Kafka brokers by requesting metadata
        match producer
            .client()
            .fetch_metadata(Some(topic), std::time::Duration::from_secs(15))
        {
            Ok(metadata) => {
                info!(
                    "Successfully connected to Kafka brokers for dead letters. Found {} topics.",
                    metadata.topics().len()
                );
            }
            Err(error) => {
                error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
                return Err(error.into());
            }
        }

        Ok(Self {
            producer,
            topic: topic.to_owned(),
            timeout: Timeout::After(std::time::Duration::from_millis(u64::from(
                config.kafka_message_timeout_ms,
            ))),
        })
    }
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterSink {
    async fn send(&self, letter: DeadLetter<'_>) -> Result<(), DeadLetterError> {
        let partition = letter.position.partition.to_string();
        let offset = letter.position.offset.to_string();
        let attempts = letter.attempts.to_string();

        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "source_partition",
                value: Some(&partition),
            })
            .insert(Header {
                key: "source_offset",
                value: Some(&offset),
            })
            .insert(Header {
                key: "attempts",
                value: Some(&attempts),
            })
            .insert(Header {
                key: "error",
                value: Some(letter.error),
            });

        let record = FutureRecord {
            topic: self.topic.as_str(),
            payload: letter.payload,
            partition: None,
            key: Some(letter.dedup_key),
            timestamp: None,
            headers: Some(headers),
        };

        match self.producer.send(record, self.timeout).await {
            Ok(_) => Ok(()),
            Err((error, _)) => Err(error.into()),
        }
    }
}
