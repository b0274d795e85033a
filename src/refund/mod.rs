//! Refund request handling. Unlike the payment flow, a refund is not
//! saga-orchestrated: spec §3 gives refunds no compensation semantics, a
//! single `REQUESTED -> PROCESSING -> {COMPLETED, FAILED}` machine instead.
//! `RefundService` runs the same "persist in one transaction, then call the
//! external gateway, then persist the outcome" shape the payment saga's
//! `ProcessPaymentStep` uses, without the orchestrator bookkeeping a
//! multi-step saga would add for a flow with nothing to compensate.

use std::sync::Arc;
use uuid::Uuid;

use crate::db::{payments, refunds};
use crate::domain::events::{RefundCompleted, RefundRequested};
use crate::domain::payment::PaymentStatus;
use crate::domain::refund::Refund;
use crate::error::AppError;
use crate::money::Money;
use crate::outbox::OutboxWriter;
use crate::pg_adapter::PaymentGatewayAdapter;
use crate::tenant::{TenantId, TenantScopedConnection};
use sqlx::PgPool;

pub struct RefundService {
    pool: PgPool,
    gateway: Arc<dyn PaymentGatewayAdapter>,
}

impl RefundService {
    pub fn new(pool: PgPool, gateway: Arc<dyn PaymentGatewayAdapter>) -> Self {
        Self { pool, gateway }
    }

    /// Issues a refund against `payment_id`. Only a CONFIRMED payment is
    /// eligible (spec §3); the amount cannot exceed the payment's own
    /// amount (`Refund::request`'s bound check).
    pub async fn request_refund(
        &self,
        tenant: &TenantId,
        payment_id: Uuid,
        amount: Money,
        reason: String,
    ) -> Result<Refund, AppError> {
        let mut scoped = TenantScopedConnection::acquire(&self.pool, tenant).await?;
        let Some((payment, payment_version)) = payments::find_by_id(scoped.as_mut(), tenant, payment_id).await? else {
            return Err(AppError::PaymentNotFound(payment_id));
        };
        if payment.status != PaymentStatus::Confirmed {
            return Err(AppError::InvalidPaymentState {
                from: payment.status.as_str().to_string(),
                to: "REFUNDED".to_string(),
            });
        }

        let mut refund = Refund::request(payment_id, amount.clone(), &payment.amount, reason)?;

        let mut tx = scoped.begin().await?;
        refunds::insert(&mut tx, tenant, &refund).await?;
        OutboxWriter::publish(
            &mut tx,
            tenant,
            &RefundRequested {
                refund_id: refund.id.clone(),
                payment_id,
                amount: amount.amount().to_string(),
                currency: amount.currency().code().to_string(),
            },
        )
        .await?;
        tx.commit().await?;

        refund.start_processing()?;
        refunds::update_status(scoped.as_mut(), &refund).await?;

        let response = self.gateway.process_refund(
            payment.pg_payment_key.as_deref().unwrap_or_default(),
            &amount,
            &refund.reason,
        ).await;

        if response.success {
            let pg_refund_id = response.pg_refund_id.unwrap_or_default();
            refund.complete(pg_refund_id.clone())?;

            let mut payment = payment;
            payment.mark_refunded()?;

            let mut tx = scoped.begin().await?;
            refunds::update_status(&mut tx, &refund).await?;
            payments::update_status(&mut tx, &payment, payment_version).await?;
            OutboxWriter::publish(
                &mut tx,
                tenant,
                &RefundCompleted { refund_id: refund.id.clone(), payment_id, pg_refund_id },
            )
            .await?;
            tx.commit().await?;
        } else {
            refund.fail(response.error_message.unwrap_or_else(|| "gateway declined refund".into()))?;
            refunds::update_status(scoped.as_mut(), &refund).await?;
        }

        Ok(refund)
    }
}
