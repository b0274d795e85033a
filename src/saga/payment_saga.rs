//! The canonical payment saga: `CREATE_ORDER` →
//! `PROCESS_PAYMENT` → optional `CONFIRM_PAYMENT`, compensating by
//! cancelling the order and marking the payment failed.

use async_trait::async_trait;
use serde_json::json;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{SagaContext, SagaDefinition, SagaStep};
use crate::db::{orders, payments};
use crate::domain::events::{OrderCancelled, OrderCreated, PaymentApproved, PaymentFailed};
use crate::domain::order::{Order, OrderLineItem};
use crate::domain::payment::{Payment, PaymentMethod};
use crate::error::AppError;
use crate::money::{Currency, Money};
use crate::outbox::OutboxWriter;
use crate::pg_adapter::PaymentGatewayAdapter;
use crate::tenant::{TenantId, TenantScopedConnection};

pub const SAGA_TYPE: &str = "PAYMENT_SAGA";

fn tenant_from_ctx(ctx: &SagaContext) -> Result<TenantId, AppError> {
    let raw = ctx.get("tenant_id").and_then(|v| v.as_str()).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("saga context missing tenant_id"))
    })?;
    TenantId::new(raw)
}

fn uuid_from_ctx(ctx: &SagaContext, key: &str) -> Result<Uuid, AppError> {
    ctx.get(key)
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("saga context missing or invalid {key}")))
}

fn str_from_ctx(ctx: &SagaContext, key: &str) -> Result<String, AppError> {
    ctx.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("saga context missing {key}")))
}

pub struct CreateOrderStep {
    pool: PgPool,
}

impl CreateOrderStep {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SagaStep for CreateOrderStep {
    fn name(&self) -> &'static str {
        "CREATE_ORDER"
    }

    async fn execute(&self, ctx: &mut SagaContext) -> Result<(), AppError> {
        let tenant = tenant_from_ctx(ctx)?;
        let user_id = uuid_from_ctx(ctx, "user_id")?;
        let currency = Currency::from_code(&str_from_ctx(ctx, "currency")?)
            .ok_or_else(|| AppError::ValidationError("unknown currency in saga context".into()))?;

        let line_items_json = ctx.get("line_items").cloned().unwrap_or_default();
        let raw_items: Vec<(Uuid, String, u32, String)> = serde_json::from_value(line_items_json)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("malformed line items in saga context: {e}")))?;
        let mut line_items = Vec::with_capacity(raw_items.len());
        for (product_id, name, qty, unit_price_raw) in raw_items {
            let unit_price = Money::new(unit_price_raw.parse().map_err(|_| AppError::ValidationError("invalid unit price".into()))?, currency)?;
            line_items.push(OrderLineItem::new(product_id, name, qty, unit_price)?);
        }

        let order = Order::create(user_id, currency, line_items, HashMap::new())?;

        let mut scoped = TenantScopedConnection::acquire(&self.pool, &tenant).await?;
        let mut tx = scoped.begin().await?;
        orders::insert(&mut tx, &tenant, &order).await?;
        OutboxWriter::publish(
            &mut tx,
            &tenant,
            &OrderCreated {
                order_id: order.id,
                user_id: order.user_id,
                total_amount: order.total_amount.amount().to_string(),
                currency: order.currency.code().to_string(),
            },
        )
        .await?;
        tx.commit().await?;

        ctx.insert("order_id".into(), json!(order.id.to_string()));
        ctx.insert("order_total_amount".into(), json!(order.total_amount.amount().to_string()));
        Ok(())
    }

    async fn compensate(&self, ctx: &mut SagaContext) -> Result<(), AppError> {
        let tenant = tenant_from_ctx(ctx)?;
        let order_id = uuid_from_ctx(ctx, "order_id")?;

        let mut scoped = TenantScopedConnection::acquire(&self.pool, &tenant).await?;
        let Some((mut order, version)) = orders::find_by_id(scoped.as_mut(), &tenant, order_id).await? else {
            return Ok(());
        };
        if order.status.can_transition_to(crate::domain::order::OrderStatus::Cancelled) {
            order.cancel()?;
            let mut tx = scoped.begin().await?;
            orders::update_status(&mut tx, &order, version).await?;
            OutboxWriter::publish(&mut tx, &tenant, &OrderCancelled { order_id: order.id, reason: "saga compensation".into() }).await?;
            tx.commit().await?;
        }
        Ok(())
    }
}

pub struct ProcessPaymentStep {
    pool: PgPool,
    gateway: Arc<dyn PaymentGatewayAdapter>,
}

impl ProcessPaymentStep {
    pub fn new(pool: PgPool, gateway: Arc<dyn PaymentGatewayAdapter>) -> Self {
        Self { pool, gateway }
    }
}

#[async_trait]
impl SagaStep for ProcessPaymentStep {
    fn name(&self) -> &'static str {
        "PROCESS_PAYMENT"
    }

    async fn execute(&self, ctx: &mut SagaContext) -> Result<(), AppError> {
        let tenant = tenant_from_ctx(ctx)?;
        let order_id = uuid_from_ctx(ctx, "order_id")?;
        let currency = Currency::from_code(&str_from_ctx(ctx, "currency")?)
            .ok_or_else(|| AppError::ValidationError("unknown currency in saga context".into()))?;
        let amount = Money::new(
            str_from_ctx(ctx, "order_total_amount")?.parse().map_err(|_| AppError::ValidationError("invalid amount".into()))?,
            currency,
        )?;
        let method_str = str_from_ctx(ctx, "method")?;
        let method = match method_str.as_str() {
            "CARD" => PaymentMethod::Card,
            "BANK_TRANSFER" => PaymentMethod::BankTransfer,
            "VIRTUAL_ACCOUNT" => PaymentMethod::VirtualAccount,
            other => return Err(AppError::ValidationError(format!("unknown payment method {other}"))),
        };

        let mut payment = Payment::create(order_id, amount.clone(), method)?;
        let mut scoped = TenantScopedConnection::acquire(&self.pool, &tenant).await?;
        let mut tx = scoped.begin().await?;
        payments::insert(&mut tx, &tenant, &payment).await?;
        tx.commit().await?;
        payment.start_processing()?;
        payments::update_status(scoped.as_mut(), &payment, 1).await?;

        ctx.insert("payment_id".into(), json!(payment.id.to_string()));

        let response = self.gateway.request_approval(order_id, &amount, &payment.method).await;

        if response.success {
            let tx_id = response.transaction_id.unwrap_or_default();
            let payment_key = response.payment_key.unwrap_or_default();
            payment.approve(tx_id.clone(), payment_key.clone())?;

            let Some((_, version)) = payments::find_by_id(scoped.as_mut(), &tenant, payment.id).await? else {
                return Err(AppError::PaymentNotFound(payment.id));
            };
            let mut tx = scoped.begin().await?;
            payments::update_status(&mut tx, &payment, version).await?;
            OutboxWriter::publish(
                &mut tx,
                &tenant,
                &PaymentApproved { payment_id: payment.id, order_id, pg_transaction_id: tx_id, amount: amount.amount().to_string(), currency: amount.currency().code().to_string() },
            )
            .await?;
            tx.commit().await?;

            ctx.insert("pg_payment_key".into(), json!(payment_key));
            Ok(())
        } else {
            let reason = response.error_message.unwrap_or_else(|| "gateway declined".into());
            payment.fail(reason.clone())?;

            let Some((_, version)) = payments::find_by_id(scoped.as_mut(), &tenant, payment.id).await? else {
                return Err(AppError::PaymentNotFound(payment.id));
            };
            let mut tx = scoped.begin().await?;
            payments::update_status(&mut tx, &payment, version).await?;
            OutboxWriter::publish(&mut tx, &tenant, &PaymentFailed { payment_id: payment.id, order_id, reason: reason.clone() }).await?;
            tx.commit().await?;

            Err(AppError::PgClientError { code: "PG_DECLINED".into(), message: reason })
        }
    }

    async fn compensate(&self, ctx: &mut SagaContext) -> Result<(), AppError> {
        let tenant = tenant_from_ctx(ctx)?;
        let Some(payment_id_raw) = ctx.get("payment_id").and_then(|v| v.as_str()) else {
            return Ok(());
        };
        let payment_id = Uuid::parse_str(payment_id_raw).map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
        let order_id = uuid_from_ctx(ctx, "order_id")?;

        let mut scoped = TenantScopedConnection::acquire(&self.pool, &tenant).await?;
        let Some((mut payment, version)) = payments::find_by_id(scoped.as_mut(), &tenant, payment_id).await? else {
            return Ok(());
        };
        if payment.status.is_terminal() {
            return Ok(());
        }
        payment.fail("saga compensation".into())?;
        let mut tx = scoped.begin().await?;
        payments::update_status(&mut tx, &payment, version).await?;
        OutboxWriter::publish(&mut tx, &tenant, &PaymentFailed { payment_id, order_id, reason: "saga compensation".into() }).await?;
        tx.commit().await?;
        Ok(())
    }
}

pub struct ConfirmPaymentStep {
    pool: PgPool,
    gateway: Arc<dyn PaymentGatewayAdapter>,
}

impl ConfirmPaymentStep {
    pub fn new(pool: PgPool, gateway: Arc<dyn PaymentGatewayAdapter>) -> Self {
        Self { pool, gateway }
    }
}

#[async_trait]
impl SagaStep for ConfirmPaymentStep {
    fn name(&self) -> &'static str {
        "CONFIRM_PAYMENT"
    }

    async fn execute(&self, ctx: &mut SagaContext) -> Result<(), AppError> {
        let tenant = tenant_from_ctx(ctx)?;
        let order_id = uuid_from_ctx(ctx, "order_id")?;
        let payment_id = uuid_from_ctx(ctx, "payment_id")?;
        let payment_key = str_from_ctx(ctx, "pg_payment_key")?;
        let currency = Currency::from_code(&str_from_ctx(ctx, "currency")?)
            .ok_or_else(|| AppError::ValidationError("unknown currency in saga context".into()))?;
        let amount = Money::new(
            str_from_ctx(ctx, "order_total_amount")?.parse().map_err(|_| AppError::ValidationError("invalid amount".into()))?,
            currency,
        )?;

        let response = self.gateway.confirm_payment(&payment_key, order_id, &amount).await;
        if !response.success {
            return Err(AppError::PgClientError { code: "PG_CONFIRM_FAILED".into(), message: response.error_message.unwrap_or_default() });
        }

        let mut scoped = TenantScopedConnection::acquire(&self.pool, &tenant).await?;
        let Some((mut payment, payment_version)) = payments::find_by_id(scoped.as_mut(), &tenant, payment_id).await? else {
            return Err(AppError::PaymentNotFound(payment_id));
        };
        payment.confirm()?;
        let Some((mut order, order_version)) = orders::find_by_id(scoped.as_mut(), &tenant, order_id).await? else {
            return Err(AppError::OrderNotFound(order_id));
        };
        order.mark_completed()?;

        let mut tx = scoped.begin().await?;
        payments::update_status(&mut tx, &payment, payment_version).await?;
        orders::update_status(&mut tx, &order, order_version).await?;
        tx.commit().await?;
        Ok(())
    }

    /// `CONFIRM_PAYMENT` is the last step of the canonical saga; nothing
    /// downstream can fail after it completes, so there is nothing to undo.
    async fn compensate(&self, _ctx: &mut SagaContext) -> Result<(), AppError> {
        Ok(())
    }
}

pub fn definition(pool: PgPool, gateway: Arc<dyn PaymentGatewayAdapter>, with_confirm: bool) -> SagaDefinition {
    let mut steps: Vec<Arc<dyn SagaStep>> = vec![
        Arc::new(CreateOrderStep::new(pool.clone())),
        Arc::new(ProcessPaymentStep::new(pool.clone(), gateway.clone())),
    ];
    if with_confirm {
        steps.push(Arc::new(ConfirmPaymentStep::new(pool, gateway)));
    }
    SagaDefinition { saga_type: SAGA_TYPE, steps }
}
