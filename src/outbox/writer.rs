//! Outbox Writer: appends one `outbox_events` row inside the
//! caller's own transaction. Never touches the broker — that's the
//! publisher's job. The shape follows the `kafka_event_bus.rs`
//! `publish_event` contract, re-pointed at a DB transaction instead of a
//! direct broker send.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::events::DomainEvent;
use crate::error::AppError;
use crate::events::CloudEvent;
use crate::tenant::TenantId;

pub struct OutboxWriter;

impl OutboxWriter {
    /// Appends `event` to the outbox within `tx`. The caller must commit
    /// `tx` together with whatever aggregate write produced this event so
    /// both land atomically.
    pub async fn publish<E: DomainEvent>(tx: &mut PgConnection, tenant: &TenantId, event: &E) -> Result<(), AppError> {
        let event_id = Uuid::new_v4();
        let envelope = CloudEvent::from_domain_event(event_id, tenant, event)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to serialize outbox payload: {e}")))?;
        let payload = serde_json::to_value(&envelope)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to serialize outbox payload: {e}")))?;

        sqlx::query(
            "INSERT INTO outbox_events (event_id, tenant_id, aggregate_type, aggregate_id, event_type, payload, status, retry_count, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, 'PENDING', 0, now())",
        )
        .bind(event_id)
        .bind(tenant.as_str())
        .bind(event.aggregate_type())
        .bind(event.aggregate_id())
        .bind(event.event_type())
        .bind(payload)
        .execute(&mut *tx)
        .await?;
        Ok(())
    }
}
