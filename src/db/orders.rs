//! Order aggregate persistence.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgConnection};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::order::{Order, OrderLineItem, OrderStatus};
use crate::error::AppError;
use crate::money::{Currency, Money};
use crate::tenant::TenantId;

#[derive(Debug, FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    currency: String,
    total_amount: Decimal,
    status: String,
    metadata: JsonValue,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct LineItemRow {
    id: Uuid,
    product_id: Uuid,
    name: String,
    qty: i32,
    unit_price: Decimal,
    total_price: Decimal,
}

fn row_to_order(row: OrderRow, items: Vec<LineItemRow>) -> Result<(Order, i64), AppError> {
    let currency = Currency::from_code(&row.currency)
        .ok_or_else(|| AppError::ValidationError(format!("unknown currency code {}", row.currency)))?;
    let line_items = items
        .into_iter()
        .map(|i| -> Result<OrderLineItem, AppError> {
            Ok(OrderLineItem {
                id: i.id,
                product_id: i.product_id,
                name: i.name,
                qty: i.qty as u32,
                unit_price: Money::new(i.unit_price, currency)?,
                total_price: Money::new(i.total_price, currency)?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let metadata: HashMap<String, String> = serde_json::from_value(row.metadata)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt order metadata: {e}")))?;
    let order = Order {
        id: row.id,
        user_id: row.user_id,
        currency,
        line_items,
        total_amount: Money::new(row.total_amount, currency)?,
        status: OrderStatus::from_str(&row.status)?,
        metadata,
        created_at: row.created_at,
        updated_at: row.updated_at,
        paid_at: row.paid_at,
        completed_at: row.completed_at,
    };
    order.revalidate()?;
    Ok((order, row.version))
}

/// Inserts a freshly-created order and its line items. Must run inside the
/// caller's transaction alongside the matching outbox row.
pub async fn insert(conn: &mut PgConnection, tenant: &TenantId, order: &Order) -> Result<(), AppError> {
    let metadata = serde_json::to_value(&order.metadata)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to serialize order metadata: {e}")))?;
    sqlx::query(
        "INSERT INTO orders (id, tenant_id, user_id, currency, total_amount, status, metadata, version, created_at, updated_at, paid_at, completed_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, 1, $8, $9, $10, $11)",
    )
    .bind(order.id)
    .bind(tenant.as_str())
    .bind(order.user_id)
    .bind(order.currency.code())
    .bind(order.total_amount.amount())
    .bind(order.status.as_str())
    .bind(metadata)
    .bind(order.created_at)
    .bind(order.updated_at)
    .bind(order.paid_at)
    .bind(order.completed_at)
    .execute(&mut *conn)
    .await?;

    for item in &order.line_items {
        sqlx::query(
            "INSERT INTO order_line_items (id, order_id, tenant_id, product_id, name, qty, unit_price, total_price)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(item.id)
        .bind(order.id)
        .bind(tenant.as_str())
        .bind(item.product_id)
        .bind(&item.name)
        .bind(item.qty as i32)
        .bind(item.unit_price.amount())
        .bind(item.total_price.amount())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Persists a status transition with optimistic concurrency: the update
/// only applies if `version` still matches what the caller read, guarding
/// against two concurrent handlers (e.g. a saga step and a direct cancel
/// request) racing on the same order.
pub async fn update_status(
    conn: &mut PgConnection,
    order: &Order,
    expected_version: i64,
) -> Result<(), AppError> {
    let result = sqlx::query(
        "UPDATE orders SET status = $1, updated_at = $2, paid_at = $3, completed_at = $4, version = version + 1
         WHERE id = $5 AND version = $6",
    )
    .bind(order.status.as_str())
    .bind(order.updated_at)
    .bind(order.paid_at)
    .bind(order.completed_at)
    .bind(order.id)
    .bind(expected_version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::ConcurrentModification { aggregate: "order", id: order.id.to_string() });
    }
    Ok(())
}

pub async fn find_by_id(conn: &mut PgConnection, tenant: &TenantId, id: Uuid) -> Result<Option<(Order, i64)>, AppError> {
    let row: Option<OrderRow> = sqlx::query_as(
        "SELECT id, user_id, currency, total_amount, status, metadata, version, created_at, updated_at, paid_at, completed_at
         FROM orders WHERE id = $1 AND tenant_id = $2",
    )
    .bind(id)
    .bind(tenant.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else { return Ok(None) };

    let items: Vec<LineItemRow> = sqlx::query_as(
        "SELECT id, product_id, name, qty, unit_price, total_price FROM order_line_items WHERE order_id = $1 AND tenant_id = $2",
    )
    .bind(id)
    .bind(tenant.as_str())
    .fetch_all(&mut *conn)
    .await?;

    row_to_order(row, items).map(Some)
}
