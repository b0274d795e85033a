//! Composition root: loads configuration, wires the durable store, cache,
//! broker, and external gateway behind the hard-core subsystems, resumes any
//! saga left running across a restart, then serves the axum router until
//! `ctrl_c` with an orderly shutdown of the background tasks.

use std::collections::HashMap;
use std::sync::Arc;

use fluxpay::api::{build_router, spawn_background_tasks, AppState};
use fluxpay::config::AppConfig;
use fluxpay::db;
use fluxpay::events::{EventBroker, InMemoryEventBroker, KafkaEventBroker};
use fluxpay::idempotency::IdempotencyGate;
use fluxpay::metrics::Metrics;
use fluxpay::pg_adapter::{HttpPaymentGatewayAdapter, PaymentGatewayAdapter};
use fluxpay::saga::{payment_saga, SagaOrchestrator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load().map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;

    let pool = db::create_pool(&config.database.url, config.database.max_connections)
        .await
        .map_err(|e| anyhow::anyhow!("failed to connect to database: {e}"))?;
    db::run_migrations(&pool).await.map_err(|e| anyhow::anyhow!("failed to run migrations: {e}"))?;

    let redis_client = match &config.redis.url {
        Some(url) => Some(redis::Client::open(url.as_str()).map_err(|e| anyhow::anyhow!("invalid redis url: {e}"))?),
        None => {
            tracing::warn!("no redis.url configured, idempotency gate running durable-store-only");
            None
        }
    };

    let broker: Arc<dyn EventBroker> = if config.kafka.brokers.trim().is_empty() {
        tracing::warn!("no kafka.brokers configured, outbox publisher will log events without dispatching them");
        Arc::new(InMemoryEventBroker::default())
    } else {
        Arc::new(KafkaEventBroker::new(&config.kafka.brokers, &config.kafka.client_id)?)
    };

    let gateway: Arc<dyn PaymentGatewayAdapter> =
        Arc::new(HttpPaymentGatewayAdapter::new(config.pg_adapter.base_url.clone(), config.pg_adapter.timeout()));

    let registry = prometheus::Registry::new();
    let metrics = Arc::new(Metrics::new(&registry));

    let idempotency = Arc::new(IdempotencyGate::new(
        redis_client,
        pool.clone(),
        config.fluxpay.idempotency.redis_key_prefix.clone(),
        config.fluxpay.idempotency.ttl(),
    ));
    let saga = Arc::new(SagaOrchestrator::new(pool.clone(), metrics.clone()));

    let config = Arc::new(config);
    let state = AppState { pool: pool.clone(), config: config.clone(), idempotency, saga: saga.clone(), broker: broker.clone(), gateway: gateway.clone(), metrics };

    recover_sagas(&saga, pool.clone(), gateway.clone()).await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let background = spawn_background_tasks(&state, shutdown_rx);

    let router = build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {addr}: {e}"))?;
    tracing::info!(%addr, "fluxpay listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

    let _ = shutdown_tx.send(true);
    for handle in background {
        let _ = handle.await;
    }

    Ok(())
}

/// Every saga registered by type so recovery can dispatch a resumed instance
/// to the right step definition, regardless of which `with_confirm` variant
/// was in flight when the process stopped.
async fn recover_sagas(
    saga: &SagaOrchestrator,
    pool: sqlx::PgPool,
    gateway: Arc<dyn PaymentGatewayAdapter>,
) {
    let mut definitions = HashMap::new();
    definitions.insert(payment_saga::SAGA_TYPE, payment_saga::definition(pool, gateway, true));

    match saga.recover_all(&definitions).await {
        Ok(n) if n > 0 => tracing::info!(resumed = n, "resumed sagas left running across restart"),
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "saga recovery scan failed"),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();
}
