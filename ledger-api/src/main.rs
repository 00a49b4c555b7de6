//! Serve stored transactions over HTTP.
use std::sync::Arc;

use axum::Router;
use config::Config;
use envconfig::Envconfig;
use eyre::Result;

use ledger_common::metrics::{serve, setup_metrics_routes};
use ledger_common::shutdown::graceful_shutdown;
use ledger_common::store::PgStore;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

mod config;
mod handlers;

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();

    let config = Config::init_from_env()?;

    let store = PgStore::new(&config.database_url, config.max_pg_connections).await?;

    let app = handlers::add_routes(
        Router::new(),
        Arc::new(store),
        config.max_concurrent_requests,
    );
    let app = setup_metrics_routes(app)?;

    let bind = config.bind();
    info!("listening on {}", bind);
    serve(app, &bind, graceful_shutdown()?).await?;

    Ok(())
}
