//! Wraps a mutating handler with the idempotency gate's acquire-lock
//! protocol (spec §4.3): acquire, run the handler only on `ACQUIRED`,
//! persist the response on success, release the lock on failure. Kept as
//! an explicit function each handler calls rather than an axum
//! `middleware::from_fn` layer, since the gate needs the raw request body
//! (for hashing) and the handler's owned success value (for caching) in
//! the same place -- see DESIGN.md.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;
use std::future::Future;
use uuid::Uuid;

use super::AppState;
use crate::error::AppError;
use crate::idempotency::IdempotencyOutcome;
use crate::tenant::TenantId;

fn envelope(status: StatusCode, code: &str, message: &str, result: Value) -> (StatusCode, Value) {
    (
        status,
        serde_json::json!({
            "isSuccess": status.is_success(),
            "code": code,
            "message": message,
            "result": result,
        }),
    )
}

pub async fn guarded<F, Fut>(
    state: &AppState,
    tenant: &TenantId,
    method: &str,
    path: &str,
    key: Uuid,
    raw_body: &[u8],
    handler: F,
) -> Response
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(StatusCode, Value), AppError>>,
{
    let outcome = if state.config.fluxpay.idempotency.enabled {
        match state.idempotency.acquire(tenant, method, path, key, raw_body).await {
            Ok(o) => o,
            Err(e) => return e.into_response(),
        }
    } else {
        IdempotencyOutcome::Acquired
    };

    state
        .metrics
        .idempotency_outcomes
        .with_label_values(&[outcome_label(&outcome)])
        .inc();

    match outcome {
        IdempotencyOutcome::Hit { status, body } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
            let value: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
            (status, Json(value)).into_response()
        }
        IdempotencyOutcome::Conflict => {
            let (status, body) = envelope(
                StatusCode::UNPROCESSABLE_ENTITY,
                "IDEMPOTENCY_CONFLICT",
                "idempotency key reused with a different request body",
                Value::Null,
            );
            (status, Json(body)).into_response()
        }
        IdempotencyOutcome::Processing => {
            let (status, body) = envelope(
                StatusCode::CONFLICT,
                "IDEMPOTENCY_PROCESSING",
                "a request with this idempotency key is already being processed",
                Value::Null,
            );
            (status, Json(body)).into_response()
        }
        IdempotencyOutcome::Acquired => match handler().await {
            Ok((status, result)) => {
                let (status, body) = envelope(status, "OK", "ok", result);
                let bytes = serde_json::to_vec(&body).unwrap_or_default();
                if state.config.fluxpay.idempotency.enabled {
                    if let Err(e) = state.idempotency.complete(tenant, method, path, key, status.as_u16(), &bytes).await {
                        tracing::error!(error = %e, "failed to persist idempotency completion");
                    }
                }
                (status, Json(body)).into_response()
            }
            Err(e) => {
                if state.config.fluxpay.idempotency.enabled {
                    if let Err(release_err) = state.idempotency.release(tenant, method, path, key).await {
                        tracing::error!(error = %release_err, "failed to release idempotency lock after handler error");
                    }
                }
                e.into_response()
            }
        },
    }
}

fn outcome_label(outcome: &IdempotencyOutcome) -> &'static str {
    match outcome {
        IdempotencyOutcome::Acquired => "acquired",
        IdempotencyOutcome::Hit { .. } => "hit",
        IdempotencyOutcome::Conflict => "conflict",
        IdempotencyOutcome::Processing => "processing",
    }
}
