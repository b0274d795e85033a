use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Stable error codes surfaced to clients. Codes are part of the
/// wire contract — renaming one is a breaking change for every caller.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("X-Tenant-Id header is missing or blank")]
    TenantMissing,

    #[error("X-Idempotency-Key header is missing")]
    IdempotencyKeyMissing,

    #[error("X-Idempotency-Key header is not a valid UUID")]
    IdempotencyKeyInvalid,

    #[error("idempotency key reused with a different request body")]
    IdempotencyConflict,

    #[error("a request with this idempotency key is already being processed")]
    IdempotencyProcessing,

    #[error("invalid order state transition: {from} -> {to}")]
    InvalidOrderState { from: String, to: String },

    #[error("invalid payment state transition: {from} -> {to}")]
    InvalidPaymentState { from: String, to: String },

    #[error("invalid refund state transition: {from} -> {to}")]
    InvalidRefundState { from: String, to: String },

    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("payment {0} not found")]
    PaymentNotFound(Uuid),

    #[error("refund {0} not found")]
    RefundNotFound(String),

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("{aggregate} {id} was modified concurrently, retry with the latest version")]
    ConcurrentModification { aggregate: &'static str, id: String },

    #[error("payment gateway error: {message} (code {code})")]
    PgClientError { code: String, message: String },

    #[error("saga {saga_id} failed at step {failed_step}: {cause}")]
    SagaExecutionFailed {
        saga_id: Uuid,
        failed_step: String,
        cause: String,
        compensation_failed: bool,
    },

    #[error("money error: {0}")]
    MoneyError(#[from] crate::money::MoneyError),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("cache error")]
    Cache(#[from] redis::RedisError),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::TenantMissing => "TENANT_MISSING",
            AppError::IdempotencyKeyMissing => "IDEMPOTENCY_KEY_MISSING",
            AppError::IdempotencyKeyInvalid => "IDEMPOTENCY_KEY_INVALID",
            AppError::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            AppError::IdempotencyProcessing => "IDEMPOTENCY_PROCESSING",
            AppError::InvalidOrderState { .. } => "INVALID_ORDER_STATE",
            AppError::InvalidPaymentState { .. } => "INVALID_PAYMENT_STATE",
            AppError::InvalidRefundState { .. } => "INVALID_REFUND_STATE",
            AppError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            AppError::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            AppError::RefundNotFound(_) => "REFUND_NOT_FOUND",
            AppError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            AppError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            AppError::PgClientError { .. } => "PG_CLIENT_ERROR",
            AppError::SagaExecutionFailed { .. } => "SAGA_EXECUTION_FAILED",
            AppError::MoneyError(_) => "VALIDATION_ERROR",
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::Database(_) => "INTERNAL",
            AppError::Cache(_) => "INTERNAL",
            AppError::Internal(_) => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::TenantMissing
            | AppError::IdempotencyKeyMissing
            | AppError::IdempotencyKeyInvalid
            | AppError::InvalidOrderState { .. }
            | AppError::InvalidPaymentState { .. }
            | AppError::InvalidRefundState { .. }
            | AppError::ValidationError(_)
            | AppError::MoneyError(_) => StatusCode::BAD_REQUEST,
            AppError::IdempotencyConflict | AppError::InsufficientBalance => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::ConcurrentModification { .. } => StatusCode::CONFLICT,
            AppError::IdempotencyProcessing => StatusCode::CONFLICT,
            AppError::OrderNotFound(_) | AppError::PaymentNotFound(_) | AppError::RefundNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            AppError::PgClientError { .. } => StatusCode::BAD_GATEWAY,
            AppError::SagaExecutionFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Database(_) | AppError::Cache(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Shared response envelope, every endpoint returns this shape.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub is_success: bool,
    pub code: String,
    pub message: String,
    pub result: Option<T>,
}

impl<T> Envelope<T> {
    pub fn ok(result: T) -> Self {
        Self {
            is_success: true,
            code: "OK".to_string(),
            message: "ok".to_string(),
            result: Some(result),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    is_success: bool,
    code: String,
    message: String,
    result: Option<Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(code = self.code(), error = %self, "request failed");

        let body = ErrorEnvelope {
            is_success: false,
            code: self.code().to_string(),
            message: self.to_string(),
            result: None,
        };

        (status, Json(body)).into_response()
    }
}
