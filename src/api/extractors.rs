//! Header extractors for the idempotency gate and request correlation,
//! following the same "reject at the boundary" shape as `TenantId`'s
//! `FromRequestParts` impl.

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::HeaderName, request::Parts},
};
use uuid::Uuid;

use crate::error::AppError;

static IDEMPOTENCY_KEY_HEADER: HeaderName = HeaderName::from_static("x-idempotency-key");
static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// `X-Idempotency-Key`: required on mutating endpoints, must parse as an
/// RFC-4122 UUID.
pub struct IdempotencyKeyHeader(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for IdempotencyKeyHeader
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(&IDEMPOTENCY_KEY_HEADER)
            .ok_or(AppError::IdempotencyKeyMissing)?
            .to_str()
            .map_err(|_| AppError::IdempotencyKeyInvalid)?;
        let key = Uuid::parse_str(raw).map_err(|_| AppError::IdempotencyKeyInvalid)?;
        Ok(Self(key))
    }
}

/// `X-Request-ID`: propagated through logs and emitted event envelopes
/// (spec §7); generated if the caller didn't supply one.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(&REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Ok(Self(id))
    }
}
