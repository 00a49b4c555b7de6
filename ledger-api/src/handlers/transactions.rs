use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use ledger_common::store::TransactionStore;
use ledger_common::transaction::{Transaction, TransactionKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

pub type AppState = Arc<dyn TransactionStore>;

#[derive(Debug, Default, Deserialize)]
pub struct TransactionsQuery {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// How a `type` query parameter narrows the results.
#[derive(Debug, PartialEq, Eq)]
enum KindFilter {
    Any,
    Only(TransactionKind),
    /// Not a kind we ever store, so nothing can match.
    Nothing,
}

impl TransactionsQuery {
    fn filter(&self) -> KindFilter {
        match self.kind.as_deref().map(str::trim) {
            None | Some("") => KindFilter::Any,
            Some(kind) => match kind.parse() {
                Ok(kind) => KindFilter::Only(kind),
                Err(_) => KindFilter::Nothing,
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    error: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

pub async fn list_transactions(
    State(store): State<AppState>,
    Query(query): Query<TransactionsQuery>,
) -> ApiResult<Vec<Transaction>> {
    debug!("listing transactions: {:?}", query);

    let kind = match query.filter() {
        KindFilter::Any => None,
        KindFilter::Only(kind) => Some(kind),
        KindFilter::Nothing => return Ok(Json(Vec::new())),
    };

    let start_time = Instant::now();
    let transactions = store.query_all(kind).await.map_err(internal_error)?;
    metrics::histogram!("transactions_api_query", "route" => "all")
        .record(start_time.elapsed().as_secs_f64());

    Ok(Json(transactions))
}

pub async fn list_subject_transactions(
    State(store): State<AppState>,
    Path(subject_id): Path<String>,
    Query(query): Query<TransactionsQuery>,
) -> ApiResult<Vec<Transaction>> {
    debug!("listing transactions for {}: {:?}", subject_id, query);

    let kind = match query.filter() {
        KindFilter::Any => None,
        KindFilter::Only(kind) => Some(kind),
        KindFilter::Nothing => return Ok(Json(Vec::new())),
    };

    let start_time = Instant::now();
    let transactions = store
        .query_by_subject(&subject_id, kind)
        .await
        .map_err(internal_error)?;
    metrics::histogram!("transactions_api_query", "route" => "subject")
        .record(start_time.elapsed().as_secs_f64());

    Ok(Json(transactions))
}

/// Log the cause, hand the caller nothing but the status.
fn internal_error<E>(err: E) -> (StatusCode, Json<ErrorResponse>)
where
    E: std::error::Error,
{
    error!("internal error: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "internal server error".to_owned(),
        }),
    )
}
