use std::time;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

use super::{PersistOutcome, StoreError, TransactionStore};
use crate::transaction::{NewTransaction, Transaction, TransactionKind};

/// A TransactionStore backed by the `transactions` table in PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Initialize a new PgStore connecting to the database at `url`.
    pub async fn new(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(time::Duration::from_secs(10))
            .connect(url)
            .await
            .map_err(|error| StoreError::ConnectionError { error })?;

        Ok(Self { pool })
    }

    /// Initialize a new PgStore from an existing pool.
    pub fn new_from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for PgStore {
    async fn persist(&self, tx: &NewTransaction) -> Result<PersistOutcome, StoreError> {
        let result = sqlx::query(
            r#"
INSERT INTO transactions
    (dedup_key, subject_id, kind, amount, occurred_at)
VALUES
    ($1, $2, $3, $4, $5)
ON CONFLICT (dedup_key) DO NOTHING
            "#,
        )
        .bind(tx.dedup_key.as_str())
        .bind(&tx.subject_id)
        .bind(tx.kind)
        .bind(tx.amount)
        .bind(tx.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "INSERT".to_owned(),
            error,
        })?;

        match result.rows_affected() {
            0 => Ok(PersistOutcome::Duplicate),
            _ => Ok(PersistOutcome::Inserted),
        }
    }

    async fn query_by_subject(
        &self,
        subject_id: &str,
        kind: Option<TransactionKind>,
    ) -> Result<Vec<Transaction>, StoreError> {
        sqlx::query_as(
            r#"
SELECT
    id, dedup_key, subject_id, kind, amount, occurred_at
FROM
    transactions
WHERE
    subject_id = $1
    AND ($2::transaction_kind IS NULL OR kind = $2)
ORDER BY
    occurred_at DESC, id DESC
            "#,
        )
        .bind(subject_id)
        .bind(kind)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })
    }

    async fn query_all(
        &self,
        kind: Option<TransactionKind>,
    ) -> Result<Vec<Transaction>, StoreError> {
        sqlx::query_as(
            r#"
SELECT
    id, dedup_key, subject_id, kind, amount, occurred_at
FROM
    transactions
WHERE
    $1::transaction_kind IS NULL OR kind = $1
ORDER BY
    occurred_at DESC, id DESC
            "#,
        )
        .bind(kind)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })
    }
}
