//! # Transaction
//!
//! The records this service moves around: the wire shape read off the stream, the validated
//! record handed to a store, and the persisted row read back out of it.
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Enumeration of the kinds of transaction we accept.
/// Bet: money staked by a subject.
/// Win: money paid out to a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_kind")]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Bet,
    Win,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("{0} is not a valid TransactionKind")]
pub struct ParseTransactionKindError(pub String);

/// Allow casting TransactionKind from strings.
impl FromStr for TransactionKind {
    type Err = ParseTransactionKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bet" => Ok(TransactionKind::Bet),
            "win" => Ok(TransactionKind::Win),
            invalid => Err(ParseTransactionKindError(invalid.to_owned())),
        }
    }
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Bet => "bet",
            TransactionKind::Win => "win",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The key a store uses to collapse duplicate deliveries of the same logical transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(pub String);

impl DedupKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A transaction as produced onto the stream.
///
/// `transaction_type` is kept as a plain string: an unknown kind is a well-formed message that
/// fails validation, which is handled differently from a payload that doesn't parse at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundTransaction {
    pub user_id: String,
    pub transaction_type: String,
    pub amount: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl InboundTransaction {
    /// The producer supplied dedup key, if there is a usable one.
    pub fn supplied_key(&self) -> Option<DedupKey> {
        self.transaction_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| DedupKey(id.to_owned()))
    }
}

/// A validated transaction ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub dedup_key: DedupKey,
    pub subject_id: String,
    pub kind: TransactionKind,
    pub amount: i64,
    pub occurred_at: DateTime<Utc>,
}

/// A transaction as stored. Rows are never updated after they are created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: i64,
    pub dedup_key: String,
    pub subject_id: String,
    pub kind: TransactionKind,
    pub amount: i64,
    pub occurred_at: DateTime<Utc>,
}
