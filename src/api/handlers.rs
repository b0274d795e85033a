//! Endpoint handlers: spec §6's four mutating routes. Each buffers the raw
//! request body (needed for the idempotency hash), deserializes it into a
//! small request struct, and runs the actual work inside `guard::guarded`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

use super::extractors::IdempotencyKeyHeader;
use super::guard::guarded;
use super::AppState;
use crate::domain::events::{OrderCancelled, OrderCreated};
use crate::domain::order::{Order, OrderLineItem};
use crate::error::AppError;
use crate::money::{Currency, Money};
use crate::outbox::OutboxWriter;
use crate::refund::RefundService;
use crate::saga::{payment_saga, SagaContext};
use crate::tenant::{TenantId, TenantScopedConnection};

#[derive(Debug, Deserialize)]
struct LineItemRequest {
    product_id: Uuid,
    name: String,
    qty: u32,
    unit_price: Decimal,
}

#[derive(Debug, Deserialize)]
struct OrderCreateRequest {
    user_id: Uuid,
    currency: String,
    line_items: Vec<LineItemRequest>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

pub async fn create_order(
    State(state): State<AppState>,
    tenant: TenantId,
    IdempotencyKeyHeader(key): IdempotencyKeyHeader,
    body: axum::body::Bytes,
) -> Response {
    let state_h = state.clone();
    let tenant_h = tenant.clone();
    let body_h = body.clone();
    guarded(&state, &tenant, "POST", "/api/v1/orders", key, &body, || async move {
        let req: OrderCreateRequest = serde_json::from_slice(&body_h)
            .map_err(|e| AppError::ValidationError(format!("malformed request body: {e}")))?;
        let currency = Currency::from_code(&req.currency)
            .ok_or_else(|| AppError::ValidationError(format!("unknown currency {}", req.currency)))?;

        let mut line_items = Vec::with_capacity(req.line_items.len());
        for item in req.line_items {
            let unit_price = Money::new(item.unit_price, currency)?;
            line_items.push(OrderLineItem::new(item.product_id, item.name, item.qty, unit_price)?);
        }

        let order = Order::create(req.user_id, currency, line_items, req.metadata)?;

        let mut scoped = TenantScopedConnection::acquire(&state_h.pool, &tenant_h).await?;
        let mut tx = scoped.begin().await?;
        crate::db::orders::insert(&mut tx, &tenant_h, &order).await?;
        OutboxWriter::publish(
            &mut tx,
            &tenant_h,
            &OrderCreated {
                order_id: order.id,
                user_id: order.user_id,
                total_amount: order.total_amount.amount().to_string(),
                currency: order.currency.code().to_string(),
            },
        )
        .await?;
        tx.commit().await?;

        Ok((
            StatusCode::CREATED,
            json!({ "orderId": order.id, "status": order.status.as_str(), "totalAmount": order.total_amount.amount().to_string() }),
        ))
    })
    .await
}

pub async fn cancel_order(
    State(state): State<AppState>,
    tenant: TenantId,
    Path(order_id): Path<Uuid>,
    IdempotencyKeyHeader(key): IdempotencyKeyHeader,
    body: axum::body::Bytes,
) -> Response {
    let state_h = state.clone();
    let tenant_h = tenant.clone();
    guarded(&state, &tenant, "PUT", "/api/v1/orders/cancel", key, &body, || async move {
        let mut scoped = TenantScopedConnection::acquire(&state_h.pool, &tenant_h).await?;
        let Some((mut order, version)) = crate::db::orders::find_by_id(scoped.as_mut(), &tenant_h, order_id).await? else {
            return Err(AppError::OrderNotFound(order_id));
        };

        order.cancel()?;

        let mut tx = scoped.begin().await?;
        crate::db::orders::update_status(&mut tx, &order, version).await?;
        OutboxWriter::publish(&mut tx, &tenant_h, &OrderCancelled { order_id: order.id, reason: "customer requested cancellation".into() }).await?;
        tx.commit().await?;

        Ok((StatusCode::OK, json!({ "orderId": order.id, "status": order.status.as_str() })))
    })
    .await
}

#[derive(Debug, Deserialize)]
struct PaymentCreateRequest {
    user_id: Uuid,
    currency: String,
    line_items: Vec<LineItemRequest>,
    method: String,
    #[serde(default)]
    confirm: bool,
}

pub async fn create_payment(
    State(state): State<AppState>,
    tenant: TenantId,
    IdempotencyKeyHeader(key): IdempotencyKeyHeader,
    body: axum::body::Bytes,
) -> Response {
    let state_h = state.clone();
    let tenant_h = tenant.clone();
    let body_h = body.clone();
    guarded(&state, &tenant, "POST", "/api/v1/payments", key, &body, || async move {
        let req: PaymentCreateRequest = serde_json::from_slice(&body_h)
            .map_err(|e| AppError::ValidationError(format!("malformed request body: {e}")))?;

        let line_items_json: Vec<(Uuid, String, u32, String)> = req
            .line_items
            .iter()
            .map(|i| (i.product_id, i.name.clone(), i.qty, i.unit_price.to_string()))
            .collect();

        let mut context = SagaContext::new();
        context.insert("tenant_id".into(), json!(tenant_h.as_str()));
        context.insert("user_id".into(), json!(req.user_id.to_string()));
        context.insert("currency".into(), json!(req.currency));
        context.insert("line_items".into(), json!(line_items_json));
        context.insert("method".into(), json!(req.method));

        let definition = payment_saga::definition(state_h.pool.clone(), state_h.gateway.clone(), req.confirm);
        let result = state_h.saga.run(&tenant_h, &definition, key, context).await?;

        Ok((
            StatusCode::CREATED,
            json!({
                "orderId": result.get("order_id"),
                "paymentId": result.get("payment_id"),
            }),
        ))
    })
    .await
}

#[derive(Debug, Deserialize)]
struct RefundCreateRequest {
    payment_id: Uuid,
    amount: Decimal,
    currency: String,
    reason: String,
}

pub async fn create_refund(
    State(state): State<AppState>,
    tenant: TenantId,
    IdempotencyKeyHeader(key): IdempotencyKeyHeader,
    body: axum::body::Bytes,
) -> Response {
    let state_h = state.clone();
    let tenant_h = tenant.clone();
    let body_h = body.clone();
    guarded(&state, &tenant, "POST", "/api/v1/refunds", key, &body, || async move {
        let req: RefundCreateRequest = serde_json::from_slice(&body_h)
            .map_err(|e| AppError::ValidationError(format!("malformed request body: {e}")))?;
        let currency = Currency::from_code(&req.currency)
            .ok_or_else(|| AppError::ValidationError(format!("unknown currency {}", req.currency)))?;
        let amount = Money::new(req.amount, currency)?;

        let service = RefundService::new(state_h.pool.clone(), state_h.gateway.clone());
        let refund = service.request_refund(&tenant_h, req.payment_id, amount, req.reason).await?;

        Ok((
            StatusCode::CREATED,
            json!({ "refundId": refund.id, "status": refund.status.as_str() }),
        ))
    })
    .await
}
