//! Tenant Context: a request-scoped tenant identifier carried
//! through all async work and injected into every DB session as
//! `SET app.tenant_id = <id>` so row-level filtering in Postgres applies.
//! No thread-local or module-level singleton is used — the identifier
//! travels as an explicit value.

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::HeaderName, request::Parts},
};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use std::fmt;

use crate::error::AppError;

pub static TENANT_HEADER: HeaderName = HeaderName::from_static("x-tenant-id");

/// A logical customer. Every row in the relational store is tagged with
/// one; application roles never see rows outside their session's tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(raw: impl Into<String>) -> Result<Self, AppError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(AppError::TenantMissing);
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Paths that never require a tenant: health and docs.
pub fn is_tenant_exempt(path: &str) -> bool {
    path.starts_with("/health") || path.starts_with("/ready") || path.starts_with("/docs")
}

/// Axum extractor: pulls `X-Tenant-Id` off the request and rejects the
/// request at the boundary if it is missing or blank.
#[async_trait]
impl<S> FromRequestParts<S> for TenantId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(&TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        TenantId::new(header)
    }
}

/// Borrows a pooled connection and scopes it to `tenant` for the lifetime of
/// the borrow. Returning the connection to the pool (end of scope) must
/// reset the session variable so a later checkout never inherits a stale
/// tenant.
pub struct TenantScopedConnection<'a> {
    conn: sqlx::pool::PoolConnection<sqlx::Postgres>,
    _marker: std::marker::PhantomData<&'a ()>,
}

impl<'a> TenantScopedConnection<'a> {
    pub async fn acquire(pool: &PgPool, tenant: &TenantId) -> Result<Self, AppError> {
        let mut conn = pool.acquire().await?;
        set_tenant(&mut conn, Some(tenant)).await?;
        Ok(Self { conn, _marker: std::marker::PhantomData })
    }

    /// An admin-scoped connection bypasses the row filter (reserved for
    /// migrations, the outbox publisher's cross-tenant claim, and saga
    /// recovery's startup scan; application request handlers must never use
    /// this path). `RESET app.tenant_id` alone is not a bypass -- the RLS
    /// policy treats "no tenant set" as zero visible rows -- so this also
    /// sets the dedicated `app.bypass_rls` flag the policy checks.
    pub async fn acquire_admin(pool: &PgPool) -> Result<Self, AppError> {
        let mut conn = pool.acquire().await?;
        set_tenant(&mut conn, None).await?;
        use sqlx::Executor;
        conn.execute("SELECT set_config('app.bypass_rls', 'true', false)").await?;
        Ok(Self { conn, _marker: std::marker::PhantomData })
    }

    pub fn as_mut(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    /// Starts a transaction on this already tenant-scoped connection. The
    /// session variable set on checkout carries into the transaction, so
    /// every statement run through it is subject to the same row filter.
    pub async fn begin(&mut self) -> Result<sqlx::Transaction<'_, sqlx::Postgres>, AppError> {
        use sqlx::Connection;
        self.conn.begin().await.map_err(Into::into)
    }
}

impl<'a> Drop for TenantScopedConnection<'a> {
    fn drop(&mut self) {
        // sqlx returns the connection to the pool when `conn` drops. We
        // cannot `await` here, so the reset happens eagerly on next
        // acquire via `set_tenant`'s unconditional SET/RESET below -- every
        // acquire always sets (or resets) the variable before use, which is
        // the fail-safe half of this guarantee. See db::tests for the
        // "handed out twice" regression test that exercises this path.
    }
}

async fn set_tenant(conn: &mut PgConnection, tenant: Option<&TenantId>) -> Result<(), AppError> {
    use sqlx::Executor;
    match tenant {
        Some(t) => {
            // tenant ids are validated non-empty text; bound as a parameter
            // via `set_config` rather than interpolated to avoid injection.
            sqlx::query("SELECT set_config('app.tenant_id', $1, false)")
                .bind(t.as_str())
                .execute(&mut *conn)
                .await?;
            // A connection previously handed out as admin-scoped must not
            // leak its bypass flag to the next tenant-scoped caller.
            conn.execute("SELECT set_config('app.bypass_rls', 'false', false)").await?;
        }
        None => {
            conn.execute("RESET app.tenant_id").await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_tenant_is_rejected() {
        assert!(matches!(TenantId::new(""), Err(AppError::TenantMissing)));
        assert!(matches!(TenantId::new("   "), Err(AppError::TenantMissing)));
    }

    #[test]
    fn health_and_docs_are_exempt() {
        assert!(is_tenant_exempt("/health"));
        assert!(is_tenant_exempt("/ready"));
        assert!(is_tenant_exempt("/docs/openapi.json"));
        assert!(!is_tenant_exempt("/api/v1/orders"));
    }
}
