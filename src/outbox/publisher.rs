//! Outbox Publisher: a background loop that claims PENDING
//! rows with competing-consumer-safe locking, dispatches them to the
//! broker, and resolves each to PUBLISHED, retried-PENDING, or dead-lettered
//! FAILED. The poll-dispatch-persist loop under `tokio::select!` against a
//! shutdown signal follows the background-worker shape in
//! `services/song.rs`.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::AppError;
use crate::events::cloudevents::{partition_key, topic_for};
use crate::events::{EventBroker, OutboundMessage};
use crate::metrics::Metrics;
use crate::tenant::{TenantId, TenantScopedConnection};

#[derive(Debug, Clone)]
pub struct OutboxPublisherConfig {
    pub batch_size: i64,
    pub max_retries: i32,
    pub polling_interval: Duration,
    pub cleanup_retention_days: i64,
}

impl Default for OutboxPublisherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
            polling_interval: Duration::from_millis(100),
            cleanup_retention_days: 7,
        }
    }
}

#[derive(Debug, FromRow)]
struct ClaimedRow {
    id: i64,
    tenant_id: String,
    aggregate_type: String,
    aggregate_id: Uuid,
    payload: serde_json::Value,
    retry_count: i32,
}

pub struct OutboxPublisher {
    pool: PgPool,
    broker: Arc<dyn EventBroker>,
    config: OutboxPublisherConfig,
    metrics: Arc<Metrics>,
}

impl OutboxPublisher {
    pub fn new(pool: PgPool, broker: Arc<dyn EventBroker>, config: OutboxPublisherConfig, metrics: Arc<Metrics>) -> Self {
        Self { pool, broker, config, metrics }
    }

    /// Runs until `shutdown` reports `true`. Each tick claims and drains one
    /// batch; a tick that errors is logged and retried on the next poll
    /// rather than terminating the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.polling_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "outbox publisher tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("outbox publisher shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Claims up to `batch_size` PENDING rows and dispatches each
    /// independently; one failing row never aborts the batch.
    pub async fn run_once(&self) -> Result<usize, AppError> {
        let claimed = self.claim_batch().await?;
        let n = claimed.len();
        for row in claimed {
            if let Err(e) = self.dispatch_one(&row).await {
                tracing::warn!(outbox_id = row.id, error = %e, "outbox row dispatch failed");
            }
        }
        Ok(n)
    }

    /// Claiming spans every tenant in one batch, so this runs on an
    /// admin-scoped connection -- the same documented bypass the saga
    /// recovery scan uses for the analogous cross-tenant maintenance need.
    async fn claim_batch(&self) -> Result<Vec<ClaimedRow>, AppError> {
        let mut admin = TenantScopedConnection::acquire_admin(&self.pool).await?;
        let rows: Vec<ClaimedRow> = sqlx::query_as(
            "WITH claimed AS (
                SELECT id FROM outbox_events
                WHERE status = 'PENDING'
                ORDER BY created_at
                FOR UPDATE SKIP LOCKED
                LIMIT $1
             )
             UPDATE outbox_events SET status = 'PROCESSING'
             WHERE id IN (SELECT id FROM claimed)
             RETURNING id, tenant_id, aggregate_type, aggregate_id, payload, retry_count",
        )
        .bind(self.config.batch_size)
        .fetch_all(admin.as_mut())
        .await?;
        Ok(rows)
    }

    async fn dispatch_one(&self, row: &ClaimedRow) -> Result<(), AppError> {
        let tenant = TenantId::new(row.tenant_id.clone())?;
        let message = OutboundMessage {
            topic: topic_for(&row.aggregate_type),
            partition_key: partition_key(&tenant, row.aggregate_id),
            payload: serde_json::to_vec(&row.payload)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to encode outbox payload: {e}")))?,
        };

        self.metrics.outbox_publish_attempts.with_label_values(&[&row.aggregate_type]).inc();
        match self.broker.publish(message).await {
            Ok(()) => self.mark_published(row.id).await,
            Err(e) => {
                self.metrics.outbox_publish_failures.with_label_values(&[&row.aggregate_type]).inc();
                self.mark_failed_or_retry(row, &e.to_string()).await
            }
        }
    }

    async fn mark_published(&self, id: i64) -> Result<(), AppError> {
        let mut admin = TenantScopedConnection::acquire_admin(&self.pool).await?;
        sqlx::query("UPDATE outbox_events SET status = 'PUBLISHED', published_at = now() WHERE id = $1")
            .bind(id)
            .execute(admin.as_mut())
            .await?;
        Ok(())
    }

    async fn mark_failed_or_retry(&self, row: &ClaimedRow, error_message: &str) -> Result<(), AppError> {
        let mut admin = TenantScopedConnection::acquire_admin(&self.pool).await?;
        if row.retry_count < self.config.max_retries {
            sqlx::query("UPDATE outbox_events SET status = 'PENDING', retry_count = retry_count + 1, error_message = $1 WHERE id = $2")
                .bind(error_message)
                .bind(row.id)
                .execute(admin.as_mut())
                .await?;
        } else {
            sqlx::query("UPDATE outbox_events SET status = 'FAILED', error_message = $1 WHERE id = $2")
                .bind(error_message)
                .bind(row.id)
                .execute(admin.as_mut())
                .await?;
            self.metrics.outbox_dead_letters.with_label_values(&[&row.aggregate_type]).inc();
            tracing::error!(outbox_id = row.id, "outbox row dead-lettered after exhausting retries");
        }
        Ok(())
    }

    /// Deletes PUBLISHED rows older than the retention window.
    pub async fn cleanup_published(&self) -> Result<u64, AppError> {
        let mut admin = TenantScopedConnection::acquire_admin(&self.pool).await?;
        let cutoff: DateTime<Utc> = Utc::now() - chrono::Duration::days(self.config.cleanup_retention_days);
        let result = sqlx::query("DELETE FROM outbox_events WHERE status = 'PUBLISHED' AND published_at < $1")
            .bind(cutoff)
            .execute(admin.as_mut())
            .await?;
        Ok(result.rows_affected())
    }
}
