//! Saga Orchestrator: a generic multi-step executor with
//! declared forward steps and reverse-order compensation, persisted to
//! `saga_instances`/`saga_steps` so a crash between steps can resume.
//! The "declare steps, drive them through a persisted state machine"
//! shape follows the background-task orchestration in `services/song.rs`;
//! the step/compensation contract itself is purpose-built for this
//! executor rather than adapted line-by-line from one file.
//!
//! `saga_instances`/`saga_steps` carry the same per-tenant row filter as
//! the aggregate tables, so every read/write here goes through a
//! tenant-scoped connection except the startup recovery scan, which needs
//! to see every tenant's non-terminal sagas and so runs admin-scoped.

pub mod payment_saga;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::metrics::Metrics;
use crate::tenant::{TenantId, TenantScopedConnection};

pub type SagaContext = HashMap<String, JsonValue>;

#[async_trait]
pub trait SagaStep: Send + Sync {
    fn name(&self) -> &'static str;
    async fn execute(&self, ctx: &mut SagaContext) -> Result<(), AppError>;
    async fn compensate(&self, ctx: &mut SagaContext) -> Result<(), AppError>;
}

pub struct SagaDefinition {
    pub saga_type: &'static str,
    pub steps: Vec<Arc<dyn SagaStep>>,
}

#[derive(Debug, FromRow)]
struct SagaInstanceRow {
    saga_id: Uuid,
    status: String,
    current_step: i32,
    context_blob: JsonValue,
}

pub struct SagaOrchestrator {
    pool: PgPool,
    metrics: Arc<Metrics>,
}

impl SagaOrchestrator {
    pub fn new(pool: PgPool, metrics: Arc<Metrics>) -> Self {
        Self { pool, metrics }
    }

    /// Starts a saga for `correlation_id` (the caller's idempotency key),
    /// or resumes the one already running for it. The unique
    /// `(tenant, correlation_id)` constraint means a second concurrent
    /// request with the same key attaches to the existing run instead of
    /// launching a duplicate.
    pub async fn run(
        &self,
        tenant: &TenantId,
        definition: &SagaDefinition,
        correlation_id: Uuid,
        initial_context: SagaContext,
    ) -> Result<SagaContext, AppError> {
        let saga_id = Uuid::new_v4();
        let now = Utc::now();
        let blob = serde_json::to_value(&initial_context).unwrap_or_default();

        let mut scoped = TenantScopedConnection::acquire(&self.pool, tenant).await?;
        let inserted = sqlx::query(
            "INSERT INTO saga_instances (saga_id, tenant_id, saga_type, correlation_id, status, current_step, context_blob, started_at, updated_at)
             VALUES ($1, $2, $3, $4, 'STARTED', 0, $5, $6, $6)
             ON CONFLICT (tenant_id, correlation_id) DO NOTHING",
        )
        .bind(saga_id)
        .bind(tenant.as_str())
        .bind(definition.saga_type)
        .bind(correlation_id)
        .bind(&blob)
        .bind(now)
        .execute(scoped.as_mut())
        .await?;

        if inserted.rows_affected() == 0 {
            return self.resume_existing(tenant, definition, correlation_id).await;
        }

        for (i, step) in definition.steps.iter().enumerate() {
            sqlx::query("INSERT INTO saga_steps (saga_id, step_order, step_name, status, step_data) VALUES ($1, $2, $3, 'PENDING', '{}'::jsonb)")
                .bind(saga_id)
                .bind(i as i32)
                .bind(step.name())
                .execute(scoped.as_mut())
                .await?;
        }
        drop(scoped);

        self.set_instance_status(tenant, saga_id, "PROCESSING", None, None).await?;
        self.execute_from(tenant, definition, saga_id, 0, initial_context).await
    }

    /// Looks up the instance already running for `correlation_id` and
    /// resumes it from its persisted `current_step`.
    async fn resume_existing(
        &self,
        tenant: &TenantId,
        definition: &SagaDefinition,
        correlation_id: Uuid,
    ) -> Result<SagaContext, AppError> {
        let mut scoped = TenantScopedConnection::acquire(&self.pool, tenant).await?;
        let row: Option<SagaInstanceRow> = sqlx::query_as(
            "SELECT saga_id, status, current_step, context_blob FROM saga_instances WHERE tenant_id = $1 AND correlation_id = $2",
        )
        .bind(tenant.as_str())
        .bind(correlation_id)
        .fetch_optional(scoped.as_mut())
        .await?;
        drop(scoped);

        let Some(row) = row else {
            return Err(AppError::Internal(anyhow::anyhow!("saga instance vanished after insert conflict")));
        };

        let context: SagaContext = serde_json::from_value(row.context_blob).unwrap_or_default();

        match row.status.as_str() {
            "COMPLETED" => Ok(context),
            "COMPENSATED" | "FAILED" => Err(AppError::SagaExecutionFailed {
                saga_id: row.saga_id,
                failed_step: "unknown".into(),
                cause: "saga previously failed".into(),
                compensation_failed: row.status == "FAILED",
            }),
            _ => self.execute_from(tenant, definition, row.saga_id, row.current_step as usize, context).await,
        }
    }

    /// Runs `definition.steps[start..]` forward, persisting progress after
    /// each step; on failure, compensates every already-completed step in
    /// this saga (loaded from `saga_steps`, not just this call's slice) in
    /// reverse order.
    async fn execute_from(
        &self,
        tenant: &TenantId,
        definition: &SagaDefinition,
        saga_id: Uuid,
        start: usize,
        mut context: SagaContext,
    ) -> Result<SagaContext, AppError> {
        let mut executed: Vec<usize> = (0..start).collect();

        for i in start..definition.steps.len() {
            let step = &definition.steps[i];
            self.set_instance_current_step(tenant, saga_id, i as i32, &context).await?;

            match step.execute(&mut context).await {
                Ok(()) => {
                    self.set_step_status(tenant, saga_id, i as i32, "COMPLETED", None).await?;
                    executed.push(i);
                }
                Err(e) => {
                    self.set_step_status(tenant, saga_id, i as i32, "FAILED", Some(e.to_string())).await?;
                    return self.compensate(tenant, definition, saga_id, &executed, &mut context, step.name(), e).await;
                }
            }
        }

        self.set_instance_status(tenant, saga_id, "COMPLETED", None, None).await?;
        self.metrics.saga_completions.with_label_values(&[definition.saga_type]).inc();
        Ok(context)
    }

    async fn compensate(
        &self,
        tenant: &TenantId,
        definition: &SagaDefinition,
        saga_id: Uuid,
        executed: &[usize],
        context: &mut SagaContext,
        failed_step: &str,
        cause: AppError,
    ) -> Result<SagaContext, AppError> {
        self.set_instance_status(tenant, saga_id, "COMPENSATING", Some(failed_step), Some(&cause.to_string())).await?;

        for &i in executed.iter().rev() {
            let step = &definition.steps[i];
            if let Err(comp_err) = step.compensate(context).await {
                self.set_instance_status(tenant, saga_id, "FAILED", Some(failed_step), Some(&cause.to_string())).await?;
                self.metrics.saga_compensation_failures.with_label_values(&[definition.saga_type]).inc();
                return Err(AppError::SagaExecutionFailed {
                    saga_id,
                    failed_step: failed_step.to_string(),
                    cause: format!("{cause}; compensation of step {} also failed: {comp_err}", step.name()),
                    compensation_failed: true,
                });
            }
            self.set_step_status(tenant, saga_id, i as i32, "COMPENSATED", None).await?;
        }

        self.set_instance_status(tenant, saga_id, "COMPENSATED", Some(failed_step), Some(&cause.to_string())).await?;
        self.metrics.saga_compensations.with_label_values(&[definition.saga_type]).inc();
        Err(AppError::SagaExecutionFailed {
            saga_id,
            failed_step: failed_step.to_string(),
            cause: cause.to_string(),
            compensation_failed: false,
        })
    }

    async fn set_instance_current_step(&self, tenant: &TenantId, saga_id: Uuid, step: i32, context: &SagaContext) -> Result<(), AppError> {
        let blob = serde_json::to_value(context).unwrap_or_default();
        let mut scoped = TenantScopedConnection::acquire(&self.pool, tenant).await?;
        sqlx::query("UPDATE saga_instances SET current_step = $1, context_blob = $2, updated_at = now() WHERE saga_id = $3")
            .bind(step)
            .bind(blob)
            .bind(saga_id)
            .execute(scoped.as_mut())
            .await?;
        Ok(())
    }

    async fn set_instance_status(
        &self,
        tenant: &TenantId,
        saga_id: Uuid,
        status: &str,
        failed_step: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), AppError> {
        let completed_at = matches!(status, "COMPLETED" | "COMPENSATED" | "FAILED").then(Utc::now);
        let mut scoped = TenantScopedConnection::acquire(&self.pool, tenant).await?;
        sqlx::query(
            "UPDATE saga_instances SET status = $1, error_message = COALESCE($2, error_message), completed_at = $3, updated_at = now() WHERE saga_id = $4",
        )
        .bind(status)
        .bind(error_message.map(|m| format!("{}: {m}", failed_step.unwrap_or(""))))
        .bind(completed_at)
        .bind(saga_id)
        .execute(scoped.as_mut())
        .await?;
        Ok(())
    }

    async fn set_step_status(
        &self,
        tenant: &TenantId,
        saga_id: Uuid,
        step_order: i32,
        status: &str,
        error_message: Option<String>,
    ) -> Result<(), AppError> {
        let (executed_at, compensated_at) = match status {
            "COMPLETED" => (Some(Utc::now()), None),
            "COMPENSATED" => (None, Some(Utc::now())),
            _ => (None, None),
        };
        let mut scoped = TenantScopedConnection::acquire(&self.pool, tenant).await?;
        sqlx::query(
            "UPDATE saga_steps SET status = $1, error_message = $2, executed_at = COALESCE($3, executed_at), compensated_at = $4
             WHERE saga_id = $5 AND step_order = $6",
        )
        .bind(status)
        .bind(error_message)
        .bind(executed_at)
        .bind(compensated_at)
        .bind(saga_id)
        .bind(step_order)
        .execute(scoped.as_mut())
        .await?;
        Ok(())
    }

    /// Scans for sagas left in a non-terminal state
    /// across every tenant, and resumes each from its `current_step`. This
    /// is the one place this crate intentionally bypasses the tenant row
    /// filter, mirroring the reserved admin identity carve-out used
    /// elsewhere for exactly this kind of cross-tenant maintenance scan.
    pub async fn recover_all(&self, definitions: &HashMap<&'static str, SagaDefinition>) -> Result<usize, AppError> {
        let mut admin = TenantScopedConnection::acquire_admin(&self.pool).await?;
        let rows: Vec<(Uuid, String, String, Uuid)> = sqlx::query_as(
            "SELECT saga_id, tenant_id, saga_type, correlation_id FROM saga_instances
             WHERE status IN ('STARTED', 'PROCESSING', 'COMPENSATING')",
        )
        .fetch_all(admin.as_mut())
        .await?;
        drop(admin);

        let mut resumed = 0;
        for (saga_id, tenant_id, saga_type, correlation_id) in rows {
            let Some(definition) = definitions.get(saga_type.as_str()) else {
                tracing::warn!(%saga_id, saga_type, "no saga definition registered for recovery, skipping");
                continue;
            };
            let tenant = TenantId::new(tenant_id)?;
            tracing::info!(%saga_id, saga_type, "resuming saga after restart");
            if let Err(e) = self.resume_existing(&tenant, definition, correlation_id).await {
                tracing::error!(%saga_id, error = %e, "saga recovery failed");
            }
            resumed += 1;
        }
        Ok(resumed)
    }
}
