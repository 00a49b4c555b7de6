//! # Ingestion
//!
//! The loop that turns stream messages into stored transactions, one message at a time:
//! fetch, parse, validate, derive a dedup key, persist, then acknowledge.
//!
//! A message is acknowledged once we are done with it for good: stored (or found already stored),
//! dropped as malformed or invalid, or handed to the dead-letter sink. A message whose persist
//! failed is released instead, so it comes back. Acknowledging only after the store accepted the
//! row means a crash can cause a redelivery but never a loss, and the store's uniqueness on the
//! dedup key absorbs the redelivery.
use std::sync::Arc;
use std::time;

use ledger_common::fingerprint::Fingerprinter;
use ledger_common::health::HealthHandle;
use ledger_common::retry::RetryPolicy;
use ledger_common::store::{PersistOutcome, StoreError, TransactionStore};
use ledger_common::transaction::NewTransaction;
use ledger_common::validation::{parse, validate};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::dead_letter::{DeadLetter, DeadLetterSink};
use crate::error::SourceError;
use crate::source::{Acknowledger, Delivery, MessageSource, Position};

/// What happened to a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Persisted as a new row, then acknowledged.
    Stored,
    /// Its dedup key was already stored. Acknowledged.
    Duplicate,
    /// Payload missing or not a transaction. Acknowledged and dropped.
    DroppedMalformed,
    /// A transaction that breaks a business rule. Acknowledged and dropped.
    DroppedInvalid,
    /// Every persist attempt failed. Released for redelivery.
    Retained,
    /// Every persist attempt failed, handed to the dead-letter sink and acknowledged.
    DeadLettered,
    /// Shutdown arrived mid-persist. Neither acknowledged nor released.
    Interrupted,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Stored => "stored",
            Outcome::Duplicate => "duplicate",
            Outcome::DroppedMalformed => "dropped_malformed",
            Outcome::DroppedInvalid => "dropped_invalid",
            Outcome::Retained => "retained",
            Outcome::DeadLettered => "dead_lettered",
            Outcome::Interrupted => "interrupted",
        }
    }

    fn should_ack(&self) -> bool {
        !matches!(self, Outcome::Retained | Outcome::Interrupted)
    }
}

/// A sequential consumer of a `MessageSource`. All collaborators are injected, so tests can
/// swap any of them for a fake.
pub struct IngestionLoop<S> {
    source: S,
    store: Arc<dyn TransactionStore>,
    fingerprinter: Fingerprinter,
    clock: Arc<dyn Clock>,
    retry_policy: RetryPolicy,
    dead_letter: Option<Arc<dyn DeadLetterSink>>,
    /// How long to wait after a failed fetch, or after releasing a message, before fetching again.
    backoff: time::Duration,
    /// The longest a fetch may block before the loop reports liveness.
    idle_interval: time::Duration,
    liveness: HealthHandle,
}

impl<S: MessageSource> IngestionLoop<S> {
    pub fn new(source: S, store: Arc<dyn TransactionStore>, liveness: HealthHandle) -> Self {
        Self {
            source,
            store,
            fingerprinter: Fingerprinter::default(),
            clock: Arc::new(SystemClock),
            retry_policy: RetryPolicy::default(),
            dead_letter: None,
            backoff: time::Duration::from_secs(1),
            idle_interval: time::Duration::from_secs(5),
            liveness,
        }
    }

    pub fn with_fingerprinter(mut self, fingerprinter: Fingerprinter) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_dead_letter(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letter = Some(sink);
        self
    }

    pub fn with_backoff(mut self, backoff: time::Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_idle_interval(mut self, idle_interval: time::Duration) -> Self {
        self.idle_interval = idle_interval;
        self
    }

    /// Consume until `cancel` fires or the source closes. Neither is an error, and nothing that
    /// happens to an individual message stops the loop.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("starting ingestion loop");

        loop {
            self.liveness.report_healthy();

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                fetched = tokio::time::timeout(self.idle_interval, self.source.fetch()) => fetched,
            };

            let delivery = match fetched {
                // Nothing to read, go around to report liveness.
                Err(_) => continue,
                Ok(Ok(delivery)) => delivery,
                Ok(Err(SourceError::Closed)) => {
                    info!("message source closed");
                    break;
                }
                Ok(Err(error)) => {
                    error!(%error, "failed to fetch message");
                    metrics::counter!("transactions_fetch_errors_total").increment(1);

                    if self.pause(&cancel).await {
                        continue;
                    }
                    break;
                }
            };

            let outcome = self.process(delivery, &cancel).await;
            if outcome == Outcome::Interrupted {
                break;
            }
            // The released message is next in line, give the store some room first.
            if outcome == Outcome::Retained && !self.pause(&cancel).await {
                break;
            }
        }

        info!("ingestion loop stopped");
    }

    /// Process one delivery and settle it with its acknowledger.
    pub async fn process(
        &self,
        delivery: Delivery<S::Acknowledger>,
        cancel: &CancellationToken,
    ) -> Outcome {
        let Delivery {
            payload,
            position,
            acknowledger,
        } = delivery;

        let outcome = self.handle(payload.as_deref(), position, cancel).await;

        metrics::counter!("transactions_processed_total", &[("outcome", outcome.as_str())])
            .increment(1);

        if outcome.should_ack() {
            if let Err(error) = acknowledger.ack().await {
                // The outcome stands. If this message is delivered again, the store absorbs it.
                warn!(%position, %error, "failed to acknowledge message");
                metrics::counter!("transactions_ack_errors_total").increment(1);
            }
        } else if outcome == Outcome::Retained {
            if let Err(error) = acknowledger.release().await {
                warn!(%position, %error, "failed to release message");
                metrics::counter!("transactions_ack_errors_total").increment(1);
            }
        }

        outcome
    }

    async fn handle(
        &self,
        payload: Option<&[u8]>,
        position: Position,
        cancel: &CancellationToken,
    ) -> Outcome {
        let inbound = match parse(payload) {
            Ok(inbound) => inbound,
            Err(error) => {
                warn!(%position, %error, "dropping malformed message");
                return Outcome::DroppedMalformed;
            }
        };

        let validated = match validate(&inbound) {
            Ok(validated) => validated,
            Err(error) => {
                warn!(
                    %position,
                    user_id = %inbound.user_id,
                    %error,
                    "dropping invalid transaction"
                );
                return Outcome::DroppedInvalid;
            }
        };

        // Processing time never feeds the key, or a late redelivery would get a new one.
        let dedup_key = inbound.supplied_key().unwrap_or_else(|| {
            self.fingerprinter.fingerprint(
                &inbound.user_id,
                validated.kind,
                validated.amount,
                inbound.timestamp,
            )
        });
        let occurred_at = inbound.timestamp.unwrap_or_else(|| self.clock.now());

        let tx = NewTransaction {
            dedup_key,
            subject_id: inbound.user_id,
            kind: validated.kind,
            amount: validated.amount,
            occurred_at,
        };

        let (attempts, error) = match self.persist(&tx, position, cancel).await {
            Ok(outcome) => return outcome,
            Err(failure) => failure,
        };

        let Some(sink) = &self.dead_letter else {
            warn!(%position, attempts, "leaving transaction for redelivery");
            return Outcome::Retained;
        };

        let error = error.to_string();
        let letter = DeadLetter {
            payload,
            position,
            dedup_key: tx.dedup_key.as_str(),
            attempts,
            error: &error,
        };

        match sink.send(letter).await {
            Ok(()) => {
                warn!(%position, dedup_key = %tx.dedup_key, attempts, "dead-lettered transaction");
                Outcome::DeadLettered
            }
            Err(error) => {
                error!(%position, %error, "failed to dead-letter transaction");
                Outcome::Retained
            }
        }
    }

    /// Attempt to persist up to the retry policy's limit. On failure returns the number of
    /// attempts made and the last error.
    async fn persist(
        &self,
        tx: &NewTransaction,
        position: Position,
        cancel: &CancellationToken,
    ) -> Result<Outcome, (u32, StoreError)> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let start = time::Instant::now();

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Outcome::Interrupted),
                result = self.store.persist(tx) => result,
            };

            metrics::histogram!("transactions_persist_duration_seconds")
                .record(start.elapsed().as_secs_f64());

            let error = match result {
                Ok(PersistOutcome::Inserted) => {
                    debug!(%position, dedup_key = %tx.dedup_key, "stored transaction");
                    return Ok(Outcome::Stored);
                }
                Ok(PersistOutcome::Duplicate) => {
                    info!(%position, dedup_key = %tx.dedup_key, "transaction already stored");
                    return Ok(Outcome::Duplicate);
                }
                Err(error) => error,
            };

            error!(%position, attempt, %error, "failed to persist transaction");

            if !self.retry_policy.should_retry(attempt) {
                return Err((attempt, error));
            }

            metrics::counter!("transactions_persist_retries_total").increment(1);
            let interval = self.retry_policy.retry_interval(attempt);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Outcome::Interrupted),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Sleep for the backoff. Returns false if cancelled first.
    async fn pause(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.backoff) => true,
        }
    }
}
