use std::sync::{Arc, Weak};
use std::time;

use async_trait::async_trait;
use ledger_common::health::HealthHandle;
use rdkafka::{
    consumer::{CommitMode, Consumer, ConsumerContext, StreamConsumer},
    error::KafkaError,
    ClientConfig, ClientContext, Message, Offset, Statistics, TopicPartitionList,
};
use tracing::{debug, info};

use crate::config::{ConsumerConfig, KafkaConfig};
use crate::error::{AckError, SourceError};
use crate::source::{Acknowledger, Delivery, MessageSource, Position};

const SEEK_TIMEOUT: time::Duration = time::Duration::from_secs(5);

/// rdkafka client context shared by the consumer and the dead-letter producer.
pub struct KafkaContext {
    liveness: HealthHandle,
}

impl From<HealthHandle> for KafkaContext {
    fn from(value: HealthHandle) -> Self {
        KafkaContext { liveness: value }
    }
}

impl ClientContext for KafkaContext {
    fn stats(&self, _: Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        self.liveness.report_healthy();
    }
}

impl ConsumerContext for KafkaContext {}

/// A `MessageSource` reading a single Kafka topic as part of a consumer group.
///
/// Offsets are never stored automatically: a message's offset only moves once its
/// `KafkaAcknowledger` is acked. Kafka offsets are a watermark per partition, so leaving a message
/// unacknowledged while acking a later one would skip it. Releasing a message instead seeks its
/// partition back, and the next fetch on that partition delivers it again.
#[derive(Clone)]
pub struct KafkaSource {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer<KafkaContext>,
    topic: String,
    auto_commit: bool,
}

impl KafkaSource {
    pub fn new(
        common_config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
        liveness: HealthHandle,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &common_config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set("enable.partition.eof", "false")
            .set(
                "enable.auto.commit",
                consumer_config.kafka_consumer_auto_commit.to_string(),
            )
            .set(
                "auto.commit.interval.ms",
                consumer_config
                    .kafka_consumer_auto_commit_interval_ms
                    .to_string(),
            );

        // Offsets are stored by acknowledgments only.
        client_config.set("enable.auto.offset.store", "false");

        if common_config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka configuration: {:?}", client_config);
        let consumer: StreamConsumer<KafkaContext> =
            client_config.create_with_context(liveness.into())?;
        consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

        info!(
            topic = %consumer_config.kafka_consumer_topic,
            group = %consumer_config.kafka_consumer_group,
            "subscribed to topic"
        );

        let inner = Inner {
            consumer,
            topic: consumer_config.kafka_consumer_topic.clone(),
            auto_commit: consumer_config.kafka_consumer_auto_commit,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    type Acknowledger = KafkaAcknowledger;

    async fn fetch(&self) -> Result<Delivery<KafkaAcknowledger>, SourceError> {
        let message = self.inner.consumer.recv().await?;

        let position = Position {
            partition: message.partition(),
            offset: message.offset(),
        };

        Ok(Delivery {
            payload: message.payload().map(<[u8]>::to_vec),
            position,
            acknowledger: KafkaAcknowledger {
                handle: Arc::downgrade(&self.inner),
                position,
            },
        })
    }
}

/// Acknowledges a single Kafka message. Holds a weak handle so an in-flight delivery doesn't keep
/// a closed consumer alive.
pub struct KafkaAcknowledger {
    handle: Weak<Inner>,
    position: Position,
}

#[async_trait]
impl Acknowledger for KafkaAcknowledger {
    async fn ack(self) -> Result<(), AckError> {
        let inner = self.handle.upgrade().ok_or(AckError::Gone)?;

        // The committed offset is the next one to read, not the one we just handled.
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &inner.topic,
            self.position.partition,
            Offset::Offset(self.position.offset + 1),
        )?;

        if inner.auto_commit {
            inner.consumer.store_offsets(&tpl)?;
            return Ok(());
        }

        // A synchronous commit blocks on the broker round trip, keep it off the runtime threads.
        tokio::task::spawn_blocking(move || inner.consumer.commit(&tpl, CommitMode::Sync))
            .await
            .map_err(|_| AckError::Gone)??;

        Ok(())
    }

    async fn release(self) -> Result<(), AckError> {
        let inner = self.handle.upgrade().ok_or(AckError::Gone)?;
        let position = self.position;

        // Seeking waits on librdkafka for up to SEEK_TIMEOUT, same as the sync commit.
        tokio::task::spawn_blocking(move || {
            inner.consumer.seek(
                &inner.topic,
                position.partition,
                Offset::Offset(position.offset),
                SEEK_TIMEOUT,
            )
        })
        .await
        .map_err(|_| AckError::Gone)??;

        Ok(())
    }
}
