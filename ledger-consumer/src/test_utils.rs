use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_common::health::{HealthHandle, HealthRegistry};
use ledger_common::store::{MemoryStore, PersistOutcome, StoreError, TransactionStore};
use ledger_common::transaction::{NewTransaction, Transaction, TransactionKind};

use rdkafka::mocking::MockCluster;
use rdkafka::producer::DefaultProducerContext;

use crate::clock::Clock;
use crate::config::KafkaConfig;
use crate::dead_letter::{DeadLetter, DeadLetterSink};
use crate::error::{AckError, DeadLetterError, SourceError};
use crate::source::{Acknowledger, Delivery, MessageSource, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckEvent {
    Acked(Position),
    Released(Position),
}

pub type AckLog = Arc<Mutex<Vec<AckEvent>>>;

pub struct RecordingAcknowledger {
    position: Position,
    log: AckLog,
    fail: bool,
}

#[async_trait]
impl Acknowledger for RecordingAcknowledger {
    async fn ack(self) -> Result<(), AckError> {
        if self.fail {
            return Err(AckError::Gone);
        }
        self.log.lock().unwrap().push(AckEvent::Acked(self.position));
        Ok(())
    }

    async fn release(self) -> Result<(), AckError> {
        if self.fail {
            return Err(AckError::Gone);
        }
        self.log
            .lock()
            .unwrap()
            .push(AckEvent::Released(self.position));
        Ok(())
    }
}

/// Hands out a fixed list of fetch results, then reports itself closed.
#[derive(Default)]
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<Delivery<RecordingAcknowledger>, SourceError>>>,
    log: AckLog,
    next_offset: Mutex<i64>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AckEvent> {
        self.log.lock().unwrap().clone()
    }

    pub fn push(&self, payload: &str) -> Position {
        self.push_delivery(Some(payload.as_bytes().to_vec()), false)
    }

    /// Queue a message whose acknowledgment fails, as if the process died right after storing it.
    pub fn push_unackable(&self, payload: &str) -> Position {
        self.push_delivery(Some(payload.as_bytes().to_vec()), true)
    }

    pub fn push_empty(&self) -> Position {
        self.push_delivery(None, false)
    }

    pub fn push_error(&self, error: SourceError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn delivery(&self, payload: &str) -> Delivery<RecordingAcknowledger> {
        let position = self.next_position();
        Delivery {
            payload: Some(payload.as_bytes().to_vec()),
            position,
            acknowledger: RecordingAcknowledger {
                position,
                log: self.log.clone(),
                fail: false,
            },
        }
    }

    fn push_delivery(&self, payload: Option<Vec<u8>>, fail: bool) -> Position {
        let position = self.next_position();
        let delivery = Delivery {
            payload,
            position,
            acknowledger: RecordingAcknowledger {
                position,
                log: self.log.clone(),
                fail,
            },
        };
        self.script.lock().unwrap().push_back(Ok(delivery));
        position
    }

    fn next_position(&self) -> Position {
        let mut next_offset = self.next_offset.lock().unwrap();
        let position = Position {
            partition: 0,
            offset: *next_offset,
        };
        *next_offset += 1;
        position
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    type Acknowledger = RecordingAcknowledger;

    async fn fetch(&self) -> Result<Delivery<RecordingAcknowledger>, SourceError> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(SourceError::Closed))
    }
}

/// A source that never has anything to deliver.
pub struct IdleSource;

#[async_trait]
impl MessageSource for IdleSource {
    type Acknowledger = RecordingAcknowledger;

    async fn fetch(&self) -> Result<Delivery<RecordingAcknowledger>, SourceError> {
        std::future::pending().await
    }
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedLetter {
    pub payload: Option<Vec<u8>>,
    pub position: Position,
    pub dedup_key: String,
    pub attempts: u32,
}

#[derive(Default)]
pub struct RecordingDeadLetterSink {
    pub letters: Mutex<Vec<RecordedLetter>>,
    pub fail: bool,
}

impl RecordingDeadLetterSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn letters(&self) -> Vec<RecordedLetter> {
        self.letters.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterSink for RecordingDeadLetterSink {
    async fn send(&self, letter: DeadLetter<'_>) -> Result<(), DeadLetterError> {
        if self.fail {
            return Err(DeadLetterError::Unavailable("sink is down".to_owned()));
        }
        self.letters.lock().unwrap().push(RecordedLetter {
            payload: letter.payload.map(<[u8]>::to_vec),
            position: letter.position,
            dedup_key: letter.dedup_key.to_owned(),
            attempts: letter.attempts,
        });
        Ok(())
    }
}

/// Fails the first `failures` persists, then behaves like the wrapped store.
pub struct FlakyStore {
    pub store: MemoryStore,
    failures: AtomicU32,
    pub attempts: AtomicU32,
}

impl FlakyStore {
    pub fn new(store: MemoryStore, failures: u32) -> Self {
        Self {
            store,
            failures: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl TransactionStore for FlakyStore {
    async fn persist(&self, tx: &NewTransaction) -> Result<PersistOutcome, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("connection reset".to_owned()));
        }
        self.store.persist(tx).await
    }

    async fn query_by_subject(
        &self,
        subject_id: &str,
        kind: Option<TransactionKind>,
    ) -> Result<Vec<Transaction>, StoreError> {
        self.store.query_by_subject(subject_id, kind).await
    }

    async fn query_all(
        &self,
        kind: Option<TransactionKind>,
    ) -> Result<Vec<Transaction>, StoreError> {
        self.store.query_all(kind).await
    }
}

pub fn create_mock_kafka() -> (MockCluster<'static, DefaultProducerContext>, KafkaConfig) {
    let cluster = MockCluster::new(1).expect("failed to create mock brokers");

    let config = KafkaConfig {
        kafka_hosts: cluster.bootstrap_servers(),
        kafka_tls: false,
        kafka_producer_linger_ms: 0,
        kafka_message_timeout_ms: 5000,
        kafka_compression_codec: "none".to_string(),
    };

    (cluster, config)
}

pub fn kafka_liveness() -> HealthHandle {
    HealthRegistry::new("liveness").register("rdkafka", std::time::Duration::from_secs(30))
}
