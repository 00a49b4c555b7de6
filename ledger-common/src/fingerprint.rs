//! # Fingerprint
//!
//! Derives a dedup key from the content of a transaction, for producers that don't send a
//! `transaction_id`.
//!
//! Only what the message itself carries goes into the hash. The timestamp is the one the producer
//! sent, truncated to a fixed quantum; when the message has none, a fixed marker is hashed in its
//! place, never the time we happened to process it. A redelivery therefore always lands on the
//! same key, however late it comes back.
//!
//! The flip side: two distinct transactions with the same subject, kind and amount and neither a
//! key nor a timestamp get the same fingerprint, and only the first one is stored. Likewise for
//! two that share a timestamp quantum. That loss is accepted; a producer that can't tolerate it
//! must send a `transaction_id`.
use std::time;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::transaction::{DedupKey, TransactionKind};

/// Length of a fingerprint, in hex characters.
pub const FINGERPRINT_LEN: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct Fingerprinter {
    quantum_ms: i64,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(time::Duration::from_secs(1))
    }
}

impl Fingerprinter {
    /// A zero quantum is treated as one millisecond, the finest resolution we hash.
    pub fn new(quantum: time::Duration) -> Self {
        let quantum_ms = i64::try_from(quantum.as_millis()).unwrap_or(i64::MAX).max(1);
        Self { quantum_ms }
    }

    pub fn quantum(&self) -> time::Duration {
        time::Duration::from_millis(self.quantum_ms as u64)
    }

    /// Compute the fingerprint for a transaction. Pure: the same inputs always give the same key.
    ///
    /// `timestamp` is the producer's timestamp, if the message had one.
    pub fn fingerprint(
        &self,
        subject_id: &str,
        kind: TransactionKind,
        amount: i64,
        timestamp: Option<DateTime<Utc>>,
    ) -> DedupKey {
        // Any quantized value is non-empty, so it can't collide with the marker.
        let quantized = match timestamp {
            Some(timestamp) => {
                let millis = timestamp.timestamp_millis();
                (millis - millis.rem_euclid(self.quantum_ms)).to_string()
            }
            None => String::new(),
        };

        let mut hasher = Sha256::new();
        hasher.update(subject_id.as_bytes());
        hasher.update(b":");
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(amount.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(quantized.as_bytes());

        DedupKey(hex::encode(hasher.finalize()))
    }
}
