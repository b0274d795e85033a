//! Axum wiring: the REST controller layer spec §1 calls out as an external
//! collaborator ("interfaces only"). This module wires the hard-core
//! subsystems (idempotency gate, saga orchestrator, outbox writer,
//! aggregates) behind the handful of endpoints spec §6 names, without
//! growing a DTO/OpenAPI layer of its own.

mod extractors;
mod guard;
mod handlers;

use axum::{
    routing::{post, put},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::events::EventBroker;
use crate::idempotency::IdempotencyGate;
use crate::metrics::Metrics;
use crate::pg_adapter::PaymentGatewayAdapter;
use crate::saga::SagaOrchestrator;

pub use extractors::{IdempotencyKeyHeader, RequestId};

#[derive(Clone)]
pub struct AppState {
    pub pool: sqlx::PgPool,
    pub config: Arc<AppConfig>,
    pub idempotency: Arc<IdempotencyGate>,
    pub saga: Arc<SagaOrchestrator>,
    pub broker: Arc<dyn EventBroker>,
    pub gateway: Arc<dyn PaymentGatewayAdapter>,
    pub metrics: Arc<Metrics>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/ready", axum::routing::get(ready))
        .route("/api/v1/orders", post(handlers::create_order))
        .route("/api/v1/orders/:id/cancel", put(handlers::cancel_order))
        .route("/api/v1/payments", post(handlers::create_payment))
        .route("/api/v1/refunds", post(handlers::create_refund))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "isSuccess": true, "code": "OK", "message": "healthy", "result": null }))
}

/// Unlike `/health`, `/ready` checks the dependencies a request actually
/// needs: the database and (if configured) the broker's producer handle.
async fn ready(axum::extract::State(state): axum::extract::State<AppState>) -> impl axum::response::IntoResponse {
    let db_ok = sqlx::query("SELECT 1")
        .execute(&state.pool)
        .await
        .is_ok();

    if db_ok {
        (axum::http::StatusCode::OK, Json(json!({ "isSuccess": true, "code": "OK", "message": "ready", "result": null })))
    } else {
        (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "isSuccess": false, "code": "NOT_READY", "message": "database unreachable", "result": null })),
        )
    }
}

/// Background tasks spawned at the composition root: outbox publisher,
/// idempotency purge, outbox cleanup. Each is a plain long-lived task
/// cancelled via the shared shutdown signal -- no container-managed
/// lifecycle, per DESIGN.md's "plain construction at the composition root".
pub fn spawn_background_tasks(
    state: &AppState,
    shutdown: tokio::sync::watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    if state.config.fluxpay.outbox.enabled {
        let publisher = Arc::new(crate::outbox::OutboxPublisher::new(
            state.pool.clone(),
            state.broker.clone(),
            crate::outbox::publisher::OutboxPublisherConfig {
                batch_size: state.config.fluxpay.outbox.batch_size,
                max_retries: state.config.fluxpay.outbox.max_retries,
                polling_interval: state.config.fluxpay.outbox.polling_interval(),
                cleanup_retention_days: state.config.fluxpay.outbox.cleanup_retention_days,
            },
            state.metrics.clone(),
        ));
        let publisher_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        }));

        if state.config.fluxpay.outbox.cleanup_enabled {
            let cleanup_publisher = publisher.clone();
            let cleanup_shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                run_daily(cleanup_shutdown, || {
                    let publisher = cleanup_publisher.clone();
                    async move {
                        match publisher.cleanup_published().await {
                            Ok(n) if n > 0 => tracing::info!(purged = n, "outbox cleanup purged published rows"),
                            Ok(_) => {}
                            Err(e) => tracing::error!(error = %e, "outbox cleanup failed"),
                        }
                    }
                })
                .await;
            }));
        }
    }

    if state.config.fluxpay.idempotency.enabled {
        let gate = state.idempotency.clone();
        let purge_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            run_daily(purge_shutdown, move || {
                let gate = gate.clone();
                async move {
                    match gate.purge_expired().await {
                        Ok(n) if n > 0 => tracing::info!(purged = n, "idempotency purge removed expired records"),
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "idempotency purge failed"),
                    }
                }
            })
            .await;
        }));
    }

    handles
}

async fn run_daily<F, Fut>(mut shutdown: tokio::sync::watch::Receiver<bool>, mut f: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
    loop {
        tokio::select! {
            _ = ticker.tick() => f().await,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
