use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{PersistOutcome, StoreError, TransactionStore};
use crate::transaction::{NewTransaction, Transaction, TransactionKind};

#[derive(Default)]
struct Rows {
    next_id: i64,
    keys: HashSet<String>,
    rows: Vec<Transaction>,
}

/// A TransactionStore that keeps rows in process memory, with the same uniqueness and ordering
/// guarantees as the table. Nothing survives a restart.
///
/// `set_unavailable` makes every call fail, to exercise the paths taken when the database is down.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Rows>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".to_owned()));
        }
        Ok(())
    }
}

fn newest_first<'a>(
    rows: impl Iterator<Item = &'a Transaction>,
    kind: Option<TransactionKind>,
) -> Vec<Transaction> {
    let mut matched: Vec<Transaction> = rows
        .filter(|row| kind.map_or(true, |k| row.kind == k))
        .cloned()
        .collect();
    matched.sort_by(|a, b| {
        b.occurred_at
            .cmp(&a.occurred_at)
            .then_with(|| b.id.cmp(&a.id))
    });
    matched
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn persist(&self, tx: &NewTransaction) -> Result<PersistOutcome, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.write().await;

        if !inner.keys.insert(tx.dedup_key.as_str().to_owned()) {
            return Ok(PersistOutcome::Duplicate);
        }

        inner.next_id += 1;
        let row = Transaction {
            id: inner.next_id,
            dedup_key: tx.dedup_key.as_str().to_owned(),
            subject_id: tx.subject_id.clone(),
            kind: tx.kind,
            amount: tx.amount,
            occurred_at: tx.occurred_at,
        };
        inner.rows.push(row);

        Ok(PersistOutcome::Inserted)
    }

    async fn query_by_subject(
        &self,
        subject_id: &str,
        kind: Option<TransactionKind>,
    ) -> Result<Vec<Transaction>, StoreError> {
        self.check_available()?;
        let inner = self.inner.read().await;

        Ok(newest_first(
            inner.rows.iter().filter(|row| row.subject_id == subject_id),
            kind,
        ))
    }

    async fn query_all(
        &self,
        kind: Option<TransactionKind>,
    ) -> Result<Vec<Transaction>, StoreError> {
        self.check_available()?;
        let inner = self.inner.read().await;

        Ok(newest_first(inner.rows.iter(), kind))
    }
}
