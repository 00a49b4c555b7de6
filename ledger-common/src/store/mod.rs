//! # Store
//!
//! Durable storage for transactions. Writes are insert-or-ignore on the dedup key, which is what
//! turns at-least-once delivery from the stream into effectively-once storage.
use async_trait::async_trait;
use thiserror::Error;

use crate::transaction::{NewTransaction, Transaction, TransactionKind};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Enumeration of errors for operations with a TransactionStore.
/// Errors can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// What a successful `persist` did. Both variants are a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Inserted,
    /// A row with the same dedup key already existed and was left untouched.
    Duplicate,
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a transaction, or do nothing if its dedup key is already stored.
    /// Errors are returned as they come, stores don't retry.
    async fn persist(&self, tx: &NewTransaction) -> Result<PersistOutcome, StoreError>;

    /// Transactions for one subject, newest first. `None` means every kind.
    async fn query_by_subject(
        &self,
        subject_id: &str,
        kind: Option<TransactionKind>,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Every transaction, newest first. `None` means every kind.
    async fn query_all(
        &self,
        kind: Option<TransactionKind>,
    ) -> Result<Vec<Transaction>, StoreError>;
}
