//! Domain event payloads fed to the outbox. Each event knows its
//! own `event_type` and the aggregate it belongs to; the outbox writer turns
//! these into `outbox_events` rows, the publisher wraps them as CloudEvents.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A domain event ready to be appended to the outbox within the caller's
/// transaction. `aggregate_type` feeds the broker topic name
/// (`fluxpay.<lowercased aggregate_type>.events`); `aggregate_id` feeds the
/// partition key.
pub trait DomainEvent: Serialize {
    fn event_type(&self) -> &'static str;
    fn aggregate_type(&self) -> &'static str;
    fn aggregate_id(&self) -> Uuid;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub total_amount: String,
    pub currency: String,
}

impl DomainEvent for OrderCreated {
    fn event_type(&self) -> &'static str {
        "order.created"
    }
    fn aggregate_type(&self) -> &'static str {
        "order"
    }
    fn aggregate_id(&self) -> Uuid {
        self.order_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: Uuid,
    pub reason: String,
}

impl DomainEvent for OrderCancelled {
    fn event_type(&self) -> &'static str {
        "order.cancelled"
    }
    fn aggregate_type(&self) -> &'static str {
        "order"
    }
    fn aggregate_id(&self) -> Uuid {
        self.order_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentApproved {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub pg_transaction_id: String,
    pub amount: String,
    pub currency: String,
}

impl DomainEvent for PaymentApproved {
    fn event_type(&self) -> &'static str {
        "payment.approved"
    }
    fn aggregate_type(&self) -> &'static str {
        "payment"
    }
    fn aggregate_id(&self) -> Uuid {
        self.payment_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailed {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub reason: String,
}

impl DomainEvent for PaymentFailed {
    fn event_type(&self) -> &'static str {
        "payment.failed"
    }
    fn aggregate_type(&self) -> &'static str {
        "payment"
    }
    fn aggregate_id(&self) -> Uuid {
        self.payment_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequested {
    pub refund_id: String,
    pub payment_id: Uuid,
    pub amount: String,
    pub currency: String,
}

impl DomainEvent for RefundRequested {
    fn event_type(&self) -> &'static str {
        "refund.requested"
    }
    fn aggregate_type(&self) -> &'static str {
        "refund"
    }
    fn aggregate_id(&self) -> Uuid {
        self.payment_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundCompleted {
    pub refund_id: String,
    pub payment_id: Uuid,
    pub pg_refund_id: String,
}

impl DomainEvent for RefundCompleted {
    fn event_type(&self) -> &'static str {
        "refund.completed"
    }
    fn aggregate_type(&self) -> &'static str {
        "refund"
    }
    fn aggregate_id(&self) -> Uuid {
        self.payment_id
    }
}
