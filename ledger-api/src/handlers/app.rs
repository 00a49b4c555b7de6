use std::convert::Infallible;

use axum::{routing, Router};
use tower::limit::ConcurrencyLimitLayer;

use super::transactions::{self, AppState};

pub fn add_routes(router: Router, store: AppState, concurrency_limit: usize) -> Router {
    let subject_transactions = routing::get(transactions::list_subject_transactions)
        .with_state(store.clone())
        .layer::<_, Infallible>(ConcurrencyLimitLayer::new(concurrency_limit));

    router
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(index)) // No async loop here, just check axum health
        .route(
            "/transactions",
            routing::get(transactions::list_transactions)
                .with_state(store)
                .layer::<_, Infallible>(ConcurrencyLimitLayer::new(concurrency_limit)),
        )
        .route(
            "/subjects/:subject_id/transactions",
            subject_transactions.clone(),
        )
        .route("/users/:subject_id/transactions", subject_transactions)
}

pub async fn index() -> &'static str {
    "transactions api"
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use chrono::{DateTime, Duration, Utc};
    use http_body_util::BodyExt; // for `collect`
    use ledger_common::store::{MemoryStore, PgStore, TransactionStore};
    use ledger_common::transaction::{DedupKey, NewTransaction, Transaction, TransactionKind};
    use sqlx::PgPool;
    use tower::ServiceExt; // for `call`, `oneshot`, and `ready`

    fn base_time() -> DateTime<Utc> {
        "2024-06-01T12:00:00Z".parse().unwrap()
    }

    fn new_transaction(
        key: &str,
        subject_id: &str,
        kind: TransactionKind,
        amount: i64,
        minutes: i64,
    ) -> NewTransaction {
        NewTransaction {
            dedup_key: DedupKey(key.to_owned()),
            subject_id: subject_id.to_owned(),
            kind,
            amount,
            occurred_at: base_time() + Duration::minutes(minutes),
        }
    }

    async fn seed(store: &dyn TransactionStore) {
        for tx in [
            new_transaction("a", "u1", TransactionKind::Bet, 100, 0),
            new_transaction("b", "u1", TransactionKind::Win, 250, 2),
            new_transaction("c", "u2", TransactionKind::Bet, 40, 1),
        ] {
            store.persist(&tx).await.unwrap();
        }
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    async fn get_transactions(app: Router, uri: &str) -> Vec<Transaction> {
        let (status, body) = get(app, uri).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_slice(&body).unwrap()
    }

    fn keys(transactions: &[Transaction]) -> Vec<&str> {
        transactions.iter().map(|t| t.dedup_key.as_str()).collect()
    }

    async fn memory_app() -> Router {
        let store = MemoryStore::new();
        seed(&store).await;
        add_routes(Router::new(), Arc::new(store), 10)
    }

    #[tokio::test]
    async fn index() {
        let (status, body) = get(memory_app().await, "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"transactions api");
    }

    #[tokio::test]
    async fn list_all_newest_first() {
        let transactions = get_transactions(memory_app().await, "/transactions").await;

        assert_eq!(keys(&transactions), vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn list_all_by_type() {
        let app = memory_app().await;

        let bets = get_transactions(app.clone(), "/transactions?type=bet").await;
        assert_eq!(keys(&bets), vec!["c", "a"]);

        let wins = get_transactions(app.clone(), "/transactions?type=win").await;
        assert_eq!(keys(&wins), vec!["b"]);

        let unfiltered = get_transactions(app, "/transactions?type=").await;
        assert_eq!(unfiltered.len(), 3);
    }

    #[tokio::test]
    async fn unknown_type_matches_nothing() {
        let transactions = get_transactions(memory_app().await, "/transactions?type=refund").await;

        assert!(transactions.is_empty());
    }

    #[tokio::test]
    async fn list_subject() {
        let app = memory_app().await;

        let transactions = get_transactions(app.clone(), "/subjects/u1/transactions").await;
        assert_eq!(keys(&transactions), vec!["b", "a"]);
        assert!(transactions.iter().all(|t| t.subject_id == "u1"));

        let bets = get_transactions(app.clone(), "/subjects/u1/transactions?type=bet").await;
        assert_eq!(keys(&bets), vec!["a"]);

        let aliased = get_transactions(app, "/users/u1/transactions").await;
        assert_eq!(keys(&aliased), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn unknown_subject_is_empty() {
        let (status, body) = get(memory_app().await, "/subjects/nobody/transactions").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"[]");
    }

    #[tokio::test]
    async fn store_failure_is_a_generic_error() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let app = add_routes(Router::new(), Arc::new(store), 10);

        let (status, body) = get(app, "/transactions").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "internal server error");
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn list_from_postgres(db: PgPool) {
        let store = PgStore::new_from_pool(db);
        seed(&store).await;
        let app = add_routes(Router::new(), Arc::new(store), 10);

        let transactions = get_transactions(app.clone(), "/transactions").await;
        assert_eq!(keys(&transactions), vec!["b", "c", "a"]);

        let transactions = get_transactions(app, "/subjects/u2/transactions?type=bet").await;
        assert_eq!(keys(&transactions), vec!["c"]);
        assert_eq!(transactions[0].amount, 40);
    }
}
