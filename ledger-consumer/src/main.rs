//! Consume transactions from Kafka and store them.
use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use envconfig::Envconfig;
use ledger_common::fingerprint::Fingerprinter;
use ledger_common::health::HealthRegistry;
use ledger_common::metrics::{serve, setup_metrics_routes};
use ledger_common::retry::RetryPolicy;
use ledger_common::shutdown::graceful_shutdown;
use ledger_common::store::{MemoryStore, PgStore, TransactionStore};
use ledger_consumer::config::{Config, StoreBackend};
use ledger_consumer::dead_letter::KafkaDeadLetterSink;
use ledger_consumer::error::ConsumerError;
use ledger_consumer::ingest::IngestionLoop;
use ledger_consumer::kafka::KafkaSource;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "transaction consumer"
}

async fn build_store(config: &Config) -> Result<Arc<dyn TransactionStore>, ConsumerError> {
    match config.store_backend {
        StoreBackend::Postgres => {
            let store = PgStore::new(&config.database_url, config.max_pg_connections).await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("using the in-memory store, transactions will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ConsumerError> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env()?;

    let liveness = HealthRegistry::new("liveness");
    let ingestion_liveness = liveness.register("ingestion", Duration::from_secs(30));
    let kafka_liveness = liveness.register("rdkafka", Duration::from_secs(30));

    let store = build_store(&config).await?;
    let source = KafkaSource::new(&config.kafka, &config.consumer, kafka_liveness.clone())?;

    let retry_policy = RetryPolicy::build(
        config.retry_policy.persist_retry_backoff_coefficient,
        config.retry_policy.persist_retry_initial_interval.0,
    )
    .max_attempts(config.retry_policy.persist_max_attempts)
    .maximum_interval(config.retry_policy.persist_retry_maximum_interval.0)
    .provide();

    let fingerprinter = Fingerprinter::new(config.fingerprint_quantum_ms.0);
    info!(quantum = ?fingerprinter.quantum(), "fingerprinting transactions without an id");

    let mut ingestion = IngestionLoop::new(source, store, ingestion_liveness)
        .with_fingerprinter(fingerprinter)
        .with_retry_policy(retry_policy)
        .with_backoff(config.fetch_error_backoff.0)
        .with_idle_interval(config.idle_report_interval.0);

    if let Some(topic) = &config.dead_letter_topic {
        let sink = KafkaDeadLetterSink::new(&config.kafka, topic.as_str(), kafka_liveness)?;
        ingestion = ingestion.with_dead_letter(Arc::new(sink));
    }

    let cancel = CancellationToken::new();

    let shutdown = graceful_shutdown()?;
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown.await;
        signal_cancel.cancel();
    });

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let router = setup_metrics_routes(router)?;
    let bind = config.bind();
    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        serve(router, &bind, async move { server_cancel.cancelled().await }).await
    });

    ingestion.run(cancel.clone()).await;

    // The loop only returns on its own when the source closes, take the server down with it.
    cancel.cancel();
    match server.await {
        Ok(result) => result?,
        Err(error) => error!(%error, "health server task failed"),
    }

    info!("Shut down");
    Ok(())
}
