//! Two-layer idempotency gate: a Redis-backed cache primary in
//! front of a Postgres durable fallback, guarding every mutating endpoint
//! with an atomic acquire-lock protocol. The "reject at the boundary,
//! extract a typed value" shape follows `middleware/auth.rs`; durable
//! access follows the raw-query style in `db/mod.rs`. The Lua-script
//! acquire step runs the hash record evaluation as a single atomic
//! `EVAL` so two concurrent requests can never both observe "absent".

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::error::AppError;
use crate::tenant::{TenantId, TenantScopedConnection};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyOutcome {
    Acquired,
    Hit { status: u16, body: Vec<u8> },
    Conflict,
    Processing,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    hash: String,
    status: CacheState,
    response_status: Option<u16>,
    response_body: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum CacheState {
    Processing,
    Completed,
}

/// Atomically evaluates the cached record and either inserts a fresh
/// "processing" placeholder or classifies the existing one. Runs as a
/// single Redis `EVAL` so two concurrent requests can never both observe
/// "absent" and both insert.
const ACQUIRE_SCRIPT: &str = r#"
local existing = redis.call('GET', KEYS[1])
if not existing then
  redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
  return 'ACQUIRED'
end
local rec = cjson.decode(existing)
if rec.hash ~= ARGV[1] then
  return 'CONFLICT'
end
if rec.status == 'processing' then
  return 'PROCESSING'
end
return existing
"#;

pub struct IdempotencyGate {
    redis: Option<redis::Client>,
    pool: PgPool,
    key_prefix: String,
    ttl: Duration,
}

impl IdempotencyGate {
    pub fn new(redis: Option<redis::Client>, pool: PgPool, key_prefix: String, ttl: Duration) -> Self {
        Self { redis, pool, key_prefix, ttl }
    }

    pub fn hash_body(body: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(body);
        hex::encode(hasher.finalize())
    }

    fn cache_key(&self, tenant: &TenantId, endpoint: &str, key: Uuid) -> String {
        format!("{}:{}:{}:{}", self.key_prefix, tenant.as_str(), endpoint, key)
    }

    #[tracing::instrument(skip(self, body), fields(tenant = %tenant, method, path, key_prefix = %short_hex(key)))]
    pub async fn acquire(
        &self,
        tenant: &TenantId,
        method: &str,
        path: &str,
        key: Uuid,
        body: &[u8],
    ) -> Result<IdempotencyOutcome, AppError> {
        let endpoint = format!("{method}:{path}");
        let hash = Self::hash_body(body);

        if let Some(client) = &self.redis {
            match self.acquire_via_cache(client, tenant, &endpoint, key, &hash).await {
                Ok(IdempotencyOutcome::Acquired) => {
                    if let Some(durable_outcome) = self.reconcile_durable_on_acquire(tenant, &endpoint, key, &hash).await? {
                        return Ok(durable_outcome);
                    }
                    return Ok(IdempotencyOutcome::Acquired);
                }
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    tracing::warn!(error = %e, "idempotency cache unreachable, falling back to durable store");
                }
            }
        }

        self.acquire_via_durable(tenant, &endpoint, key, &hash).await
    }

    async fn acquire_via_cache(
        &self,
        client: &redis::Client,
        tenant: &TenantId,
        endpoint: &str,
        key: Uuid,
        hash: &str,
    ) -> Result<IdempotencyOutcome, AppError> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let cache_key = self.cache_key(tenant, endpoint, key);
        let placeholder = serde_json::to_string(&CacheRecord {
            hash: hash.to_string(),
            status: CacheState::Processing,
            response_status: None,
            response_body: None,
        })
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

        let script = redis::Script::new(ACQUIRE_SCRIPT);
        let raw: String = script
            .key(&cache_key)
            .arg(hash)
            .arg(&placeholder)
            .arg(self.ttl.as_secs())
            .invoke_async(&mut conn)
            .await?;

        match raw.as_str() {
            "ACQUIRED" => Ok(IdempotencyOutcome::Acquired),
            "CONFLICT" => Ok(IdempotencyOutcome::Conflict),
            "PROCESSING" => Ok(IdempotencyOutcome::Processing),
            completed_json => {
                let rec: CacheRecord = serde_json::from_str(completed_json)
                    .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt idempotency cache record: {e}")))?;
                Ok(IdempotencyOutcome::Hit {
                    status: rec.response_status.unwrap_or(200),
                    body: rec.response_body.unwrap_or_default().into_bytes(),
                })
            }
        }
    }

    /// After a cache `ACQUIRED`, the durable store might already hold a
    /// final record from before a cache restart: completed, or a conflict
    /// the cache lost. Either wins over the fresh cache placeholder this
    /// call just wrote. Returns `Some(outcome)` when the durable record
    /// should override the cache's `ACQUIRED`.
    async fn reconcile_durable_on_acquire(
        &self,
        tenant: &TenantId,
        endpoint: &str,
        key: Uuid,
        hash: &str,
    ) -> Result<Option<IdempotencyOutcome>, AppError> {
        let now = Utc::now();
        let expires_at = now + ChronoDuration::seconds(self.ttl.as_secs() as i64);
        let mut scoped = TenantScopedConnection::acquire(&self.pool, tenant).await?;
        let inserted = sqlx::query(
            "INSERT INTO idempotency_keys (tenant_id, endpoint, idempotency_key, payload_hash, state, created_at, expires_at)
             VALUES ($1, $2, $3, $4, 'processing', $5, $6)
             ON CONFLICT (tenant_id, endpoint, idempotency_key) DO NOTHING",
        )
        .bind(tenant.as_str())
        .bind(endpoint)
        .bind(key)
        .bind(hash)
        .bind(now)
        .bind(expires_at)
        .execute(scoped.as_mut())
        .await?;

        if inserted.rows_affected() == 0 {
            if let Some(row) = load_durable(scoped.as_mut(), tenant, endpoint, key).await? {
                if row.expires_at >= now {
                    if row.payload_hash != hash {
                        return Ok(Some(IdempotencyOutcome::Conflict));
                    }
                    if row.state == "completed" {
                        return Ok(Some(IdempotencyOutcome::Hit {
                            status: row.response_status.unwrap_or(200) as u16,
                            body: row.response_body.map(|v| v.to_string().into_bytes()).unwrap_or_default(),
                        }));
                    }
                }
            }
        }
        Ok(None)
    }

    async fn acquire_via_durable(
        &self,
        tenant: &TenantId,
        endpoint: &str,
        key: Uuid,
        hash: &str,
    ) -> Result<IdempotencyOutcome, AppError> {
        let now = Utc::now();
        let expires_at = now + ChronoDuration::seconds(self.ttl.as_secs() as i64);
        let mut scoped = TenantScopedConnection::acquire(&self.pool, tenant).await?;

        let inserted = sqlx::query(
            "INSERT INTO idempotency_keys (tenant_id, endpoint, idempotency_key, payload_hash, state, created_at, expires_at)
             VALUES ($1, $2, $3, $4, 'processing', $5, $6)
             ON CONFLICT (tenant_id, endpoint, idempotency_key) DO NOTHING",
        )
        .bind(tenant.as_str())
        .bind(endpoint)
        .bind(key)
        .bind(hash)
        .bind(now)
        .bind(expires_at)
        .execute(scoped.as_mut())
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(IdempotencyOutcome::Acquired);
        }

        // Conflict: an existing row might be expired (purge it and retry once),
        // or live (classify it).
        let Some(row) = load_durable(scoped.as_mut(), tenant, endpoint, key).await? else {
            return Ok(IdempotencyOutcome::Acquired);
        };

        if row.expires_at < now {
            sqlx::query("DELETE FROM idempotency_keys WHERE tenant_id = $1 AND endpoint = $2 AND idempotency_key = $3")
                .bind(tenant.as_str())
                .bind(endpoint)
                .bind(key)
                .execute(scoped.as_mut())
                .await?;
            let retried = sqlx::query(
                "INSERT INTO idempotency_keys (tenant_id, endpoint, idempotency_key, payload_hash, state, created_at, expires_at)
                 VALUES ($1, $2, $3, $4, 'processing', $5, $6)
                 ON CONFLICT (tenant_id, endpoint, idempotency_key) DO NOTHING",
            )
            .bind(tenant.as_str())
            .bind(endpoint)
            .bind(key)
            .bind(hash)
            .bind(now)
            .bind(expires_at)
            .execute(scoped.as_mut())
            .await?;
            return Ok(if retried.rows_affected() == 1 {
                IdempotencyOutcome::Acquired
            } else {
                IdempotencyOutcome::Processing
            });
        }

        if row.payload_hash != hash {
            return Ok(IdempotencyOutcome::Conflict);
        }
        if row.state == "processing" {
            return Ok(IdempotencyOutcome::Processing);
        }
        Ok(IdempotencyOutcome::Hit {
            status: row.response_status.unwrap_or(200) as u16,
            body: row.response_body.map(|v| v.to_string().into_bytes()).unwrap_or_default(),
        })
    }

    /// Writes the final response to both layers with TTL once the handler
    /// completes successfully.
    pub async fn complete(
        &self,
        tenant: &TenantId,
        method: &str,
        path: &str,
        key: Uuid,
        status: u16,
        body: &[u8],
    ) -> Result<(), AppError> {
        let endpoint = format!("{method}:{path}");
        let hash = Self::hash_body(body);
        let body_str = String::from_utf8_lossy(body).to_string();

        if let Some(client) = &self.redis {
            if let Ok(mut conn) = client.get_multiplexed_async_connection().await {
                let record = CacheRecord {
                    hash: hash.clone(),
                    status: CacheState::Completed,
                    response_status: Some(status),
                    response_body: Some(body_str.clone()),
                };
                if let Ok(serialized) = serde_json::to_string(&record) {
                    let cache_key = self.cache_key(tenant, &endpoint, key);
                    let _: Result<(), _> = conn.set_ex(&cache_key, serialized, self.ttl.as_secs()).await;
                }
            }
        }

        let mut scoped = TenantScopedConnection::acquire(&self.pool, tenant).await?;
        sqlx::query(
            "UPDATE idempotency_keys SET state = 'completed', response_status = $1, response_body = $2
             WHERE tenant_id = $3 AND endpoint = $4 AND idempotency_key = $5",
        )
        .bind(status as i32)
        .bind(serde_json::Value::String(body_str))
        .bind(tenant.as_str())
        .bind(&endpoint)
        .bind(key)
        .execute(scoped.as_mut())
        .await?;
        Ok(())
    }

    /// Releases the lock on handler failure so a retry with the
    /// same key can proceed.
    pub async fn release(&self, tenant: &TenantId, method: &str, path: &str, key: Uuid) -> Result<(), AppError> {
        let endpoint = format!("{method}:{path}");

        if let Some(client) = &self.redis {
            if let Ok(mut conn) = client.get_multiplexed_async_connection().await {
                let cache_key = self.cache_key(tenant, &endpoint, key);
                let _: Result<(), _> = conn.del(&cache_key).await;
            }
        }

        let mut scoped = TenantScopedConnection::acquire(&self.pool, tenant).await?;
        sqlx::query("DELETE FROM idempotency_keys WHERE tenant_id = $1 AND endpoint = $2 AND idempotency_key = $3")
            .bind(tenant.as_str())
            .bind(&endpoint)
            .bind(key)
            .execute(scoped.as_mut())
            .await?;
        Ok(())
    }

    /// Periodic purge of expired durable records.
    /// Expiry is tenant-agnostic housekeeping, so this scans across every
    /// tenant on an admin-scoped connection, the same carve-out the outbox
    /// publisher and saga recovery scan use for cross-tenant maintenance.
    pub async fn purge_expired(&self) -> Result<u64, AppError> {
        let mut admin = TenantScopedConnection::acquire_admin(&self.pool).await?;
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at < $1")
            .bind(Utc::now())
            .execute(admin.as_mut())
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DurableRow {
    payload_hash: String,
    response_body: Option<serde_json::Value>,
    response_status: Option<i32>,
    state: String,
    expires_at: DateTime<Utc>,
}

async fn load_durable(
    conn: &mut sqlx::PgConnection,
    tenant: &TenantId,
    endpoint: &str,
    key: Uuid,
) -> Result<Option<DurableRow>, AppError> {
    let row: Option<DurableRow> = sqlx::query_as(
        "SELECT payload_hash, response_body, response_status, state, expires_at
         FROM idempotency_keys WHERE tenant_id = $1 AND endpoint = $2 AND idempotency_key = $3",
    )
    .bind(tenant.as_str())
    .bind(endpoint)
    .bind(key)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

fn short_hex(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_for_identical_bodies() {
        let a = IdempotencyGate::hash_body(b"{\"amount\":100}");
        let b = IdempotencyGate::hash_body(b"{\"amount\":100}");
        assert_eq!(a, b);
    }

    #[test]
    fn hash_differs_for_different_bodies() {
        let a = IdempotencyGate::hash_body(b"{\"amount\":100}");
        let b = IdempotencyGate::hash_body(b"{\"amount\":200}");
        assert_ne!(a, b);
    }
}
