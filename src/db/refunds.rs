//! Refund aggregate persistence.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::domain::refund::{Refund, RefundStatus};
use crate::error::AppError;
use crate::money::{Currency, Money};
use crate::tenant::TenantId;

#[derive(Debug, FromRow)]
struct RefundRow {
    id: String,
    payment_id: Uuid,
    amount: Decimal,
    currency: String,
    reason: String,
    status: String,
    pg_refund_id: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn row_to_refund(row: RefundRow) -> Result<Refund, AppError> {
    let currency = Currency::from_code(&row.currency)
        .ok_or_else(|| AppError::ValidationError(format!("unknown currency code {}", row.currency)))?;
    Ok(Refund {
        id: row.id,
        payment_id: row.payment_id,
        amount: Money::new(row.amount, currency)?,
        reason: row.reason,
        status: RefundStatus::from_str(&row.status)?,
        pg_refund_id: row.pg_refund_id,
        error: row.error,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

pub async fn insert(conn: &mut PgConnection, tenant: &TenantId, refund: &Refund) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO refunds (id, tenant_id, payment_id, amount, currency, reason, status, pg_refund_id, error, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(&refund.id)
    .bind(tenant.as_str())
    .bind(refund.payment_id)
    .bind(refund.amount.amount())
    .bind(refund.amount.currency().code())
    .bind(&refund.reason)
    .bind(refund.status.as_str())
    .bind(&refund.pg_refund_id)
    .bind(&refund.error)
    .bind(refund.created_at)
    .bind(refund.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn update_status(conn: &mut PgConnection, refund: &Refund) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE refunds SET status = $1, pg_refund_id = $2, error = $3, updated_at = $4 WHERE id = $5",
    )
    .bind(refund.status.as_str())
    .bind(&refund.pg_refund_id)
    .bind(&refund.error)
    .bind(refund.updated_at)
    .bind(&refund.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn find_by_id(conn: &mut PgConnection, tenant: &TenantId, id: &str) -> Result<Option<Refund>, AppError> {
    let row: Option<RefundRow> = sqlx::query_as(
        "SELECT id, payment_id, amount, currency, reason, status, pg_refund_id, error, created_at, updated_at
         FROM refunds WHERE id = $1 AND tenant_id = $2",
    )
    .bind(id)
    .bind(tenant.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    row.map(row_to_refund).transpose()
}
