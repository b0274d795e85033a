//! Payment aggregate persistence.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::domain::payment::{Payment, PaymentMethod, PaymentStatus};
use crate::error::AppError;
use crate::money::{Currency, Money};
use crate::tenant::TenantId;

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: Uuid,
    order_id: Uuid,
    amount: Decimal,
    currency: String,
    status: String,
    method: String,
    pg_transaction_id: Option<String>,
    pg_payment_key: Option<String>,
    failure_reason: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    approved_at: Option<DateTime<Utc>>,
    confirmed_at: Option<DateTime<Utc>>,
}

fn method_to_str(method: &PaymentMethod) -> &'static str {
    match method {
        PaymentMethod::Card => "CARD",
        PaymentMethod::BankTransfer => "BANK_TRANSFER",
        PaymentMethod::VirtualAccount => "VIRTUAL_ACCOUNT",
    }
}

fn method_from_str(s: &str) -> Result<PaymentMethod, AppError> {
    match s {
        "CARD" => Ok(PaymentMethod::Card),
        "BANK_TRANSFER" => Ok(PaymentMethod::BankTransfer),
        "VIRTUAL_ACCOUNT" => Ok(PaymentMethod::VirtualAccount),
        other => Err(AppError::ValidationError(format!("unknown payment method {other}"))),
    }
}

fn row_to_payment(row: PaymentRow) -> Result<(Payment, i64), AppError> {
    let currency = Currency::from_code(&row.currency)
        .ok_or_else(|| AppError::ValidationError(format!("unknown currency code {}", row.currency)))?;
    let payment = Payment {
        id: row.id,
        order_id: row.order_id,
        amount: Money::new(row.amount, currency)?,
        status: PaymentStatus::from_str(&row.status)?,
        method: method_from_str(&row.method)?,
        pg_transaction_id: row.pg_transaction_id,
        pg_payment_key: row.pg_payment_key,
        failure_reason: row.failure_reason,
        created_at: row.created_at,
        updated_at: row.updated_at,
        approved_at: row.approved_at,
        confirmed_at: row.confirmed_at,
    };
    payment.revalidate()?;
    Ok((payment, row.version))
}

pub async fn insert(conn: &mut PgConnection, tenant: &TenantId, payment: &Payment) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO payments (id, tenant_id, order_id, amount, currency, status, method, pg_transaction_id, pg_payment_key, failure_reason, version, created_at, updated_at, approved_at, confirmed_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 1, $11, $12, $13, $14)",
    )
    .bind(payment.id)
    .bind(tenant.as_str())
    .bind(payment.order_id)
    .bind(payment.amount.amount())
    .bind(payment.amount.currency().code())
    .bind(payment.status.as_str())
    .bind(method_to_str(&payment.method))
    .bind(&payment.pg_transaction_id)
    .bind(&payment.pg_payment_key)
    .bind(&payment.failure_reason)
    .bind(payment.created_at)
    .bind(payment.updated_at)
    .bind(payment.approved_at)
    .bind(payment.confirmed_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn update_status(conn: &mut PgConnection, payment: &Payment, expected_version: i64) -> Result<(), AppError> {
    let result = sqlx::query(
        "UPDATE payments SET status = $1, pg_transaction_id = $2, pg_payment_key = $3, failure_reason = $4,
         updated_at = $5, approved_at = $6, confirmed_at = $7, version = version + 1
         WHERE id = $8 AND version = $9",
    )
    .bind(payment.status.as_str())
    .bind(&payment.pg_transaction_id)
    .bind(&payment.pg_payment_key)
    .bind(&payment.failure_reason)
    .bind(payment.updated_at)
    .bind(payment.approved_at)
    .bind(payment.confirmed_at)
    .bind(payment.id)
    .bind(expected_version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::ConcurrentModification { aggregate: "payment", id: payment.id.to_string() });
    }
    Ok(())
}

pub async fn find_by_id(conn: &mut PgConnection, tenant: &TenantId, id: Uuid) -> Result<Option<(Payment, i64)>, AppError> {
    let row: Option<PaymentRow> = sqlx::query_as(
        "SELECT id, order_id, amount, currency, status, method, pg_transaction_id, pg_payment_key, failure_reason, version, created_at, updated_at, approved_at, confirmed_at
         FROM payments WHERE id = $1 AND tenant_id = $2",
    )
    .bind(id)
    .bind(tenant.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    row.map(row_to_payment).transpose()
}

pub async fn find_by_order_id(conn: &mut PgConnection, tenant: &TenantId, order_id: Uuid) -> Result<Option<(Payment, i64)>, AppError> {
    let row: Option<PaymentRow> = sqlx::query_as(
        "SELECT id, order_id, amount, currency, status, method, pg_transaction_id, pg_payment_key, failure_reason, version, created_at, updated_at, approved_at, confirmed_at
         FROM payments WHERE order_id = $1 AND tenant_id = $2",
    )
    .bind(order_id)
    .bind(tenant.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    row.map(row_to_payment).transpose()
}
