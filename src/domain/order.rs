use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::money::{Currency, Money};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Completed,
    Cancelled,
    Failed,
}

impl OrderStatus {
    /// Allowed edges:
    /// `PENDING -> PAID -> COMPLETED`; `PENDING -> {CANCELLED, FAILED}`;
    /// `PAID -> {CANCELLED, FAILED}`.
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, target),
            (Pending, Paid) | (Pending, Cancelled) | (Pending, Failed) |
            (Paid, Completed) | (Paid, Cancelled) | (Paid, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PAID" => Ok(OrderStatus::Paid),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "FAILED" => Ok(OrderStatus::Failed),
            other => Err(AppError::ValidationError(format!("unknown order status {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub qty: u32,
    pub unit_price: Money,
    pub total_price: Money,
}

impl OrderLineItem {
    pub fn new(product_id: Uuid, name: String, qty: u32, unit_price: Money) -> Result<Self, AppError> {
        if qty == 0 {
            return Err(AppError::ValidationError("line item quantity must be > 0".into()));
        }
        let total_price = unit_price.multiply(rust_decimal::Decimal::from(qty))?;
        Ok(Self {
            id: Uuid::new_v4(),
            product_id,
            name,
            qty,
            unit_price,
            total_price,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub currency: Currency,
    pub line_items: Vec<OrderLineItem>,
    pub total_amount: Money,
    pub status: OrderStatus,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Creates a new order on intake. `total = Σ unit × qty`, invariant
    /// enforced by summing each line item's already-validated total.
    pub fn create(
        user_id: Uuid,
        currency: Currency,
        line_items: Vec<OrderLineItem>,
        metadata: HashMap<String, String>,
    ) -> Result<Self, AppError> {
        if line_items.is_empty() {
            return Err(AppError::ValidationError("order must have at least one line item".into()));
        }
        let mut total = Money::zero(currency);
        for item in &line_items {
            if item.unit_price.currency() != currency {
                return Err(AppError::MoneyError(crate::money::MoneyError::CurrencyMismatch(
                    item.unit_price.currency(),
                    currency,
                )));
            }
            total = total.add(&item.total_price)?;
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            currency,
            line_items,
            total_amount: total,
            status: OrderStatus::Pending,
            metadata,
            created_at: now,
            updated_at: now,
            paid_at: None,
            completed_at: None,
        })
    }

    fn transition(&mut self, target: OrderStatus) -> Result<(), AppError> {
        if !self.status.can_transition_to(target) {
            return Err(AppError::InvalidOrderState {
                from: self.status.as_str().to_string(),
                to: target.as_str().to_string(),
            });
        }
        self.status = target;
        self.updated_at = Utc::now();
        match target {
            OrderStatus::Paid => self.paid_at = Some(self.updated_at),
            OrderStatus::Completed => self.completed_at = Some(self.updated_at),
            _ => {}
        }
        Ok(())
    }

    pub fn mark_paid(&mut self) -> Result<(), AppError> {
        self.transition(OrderStatus::Paid)
    }

    pub fn mark_completed(&mut self) -> Result<(), AppError> {
        self.transition(OrderStatus::Completed)
    }

    pub fn cancel(&mut self) -> Result<(), AppError> {
        self.transition(OrderStatus::Cancelled)
    }

    pub fn mark_failed(&mut self) -> Result<(), AppError> {
        self.transition(OrderStatus::Failed)
    }

    /// Revalidates structural invariants after restoring from storage
    ///: PAID/COMPLETED implies the matching timestamp is set.
    pub fn revalidate(&self) -> Result<(), AppError> {
        if matches!(self.status, OrderStatus::Paid | OrderStatus::Completed) && self.paid_at.is_none() {
            return Err(AppError::ValidationError(format!(
                "order {} has status {} but no paid_at",
                self.id,
                self.status.as_str()
            )));
        }
        if self.status == OrderStatus::Completed && self.completed_at.is_none() {
            return Err(AppError::ValidationError(format!(
                "order {} is COMPLETED but has no completed_at",
                self.id
            )));
        }
        for item in &self.line_items {
            if item.qty == 0 {
                return Err(AppError::ValidationError(format!(
                    "order {} has a zero-quantity line item",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;
    use rust_decimal_macros::dec;

    fn line_item() -> OrderLineItem {
        OrderLineItem::new(
            Uuid::new_v4(),
            "widget".into(),
            2,
            Money::new(dec!(10), Currency::Usd).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn total_is_sum_of_line_items() {
        let order = Order::create(Uuid::new_v4(), Currency::Usd, vec![line_item()], HashMap::new()).unwrap();
        assert_eq!(order.total_amount.amount(), dec!(20));
    }

    #[test]
    fn empty_line_items_is_rejected() {
        let result = Order::create(Uuid::new_v4(), Currency::Usd, vec![], HashMap::new());
        assert!(result.is_err());
    }

    #[test]
    fn zero_qty_line_item_is_rejected() {
        let result = OrderLineItem::new(Uuid::new_v4(), "x".into(), 0, Money::new(dec!(1), Currency::Usd).unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn happy_path_transitions() {
        let mut order = Order::create(Uuid::new_v4(), Currency::Usd, vec![line_item()], HashMap::new()).unwrap();
        order.mark_paid().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert!(order.paid_at.is_some());
        order.mark_completed().unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.completed_at.is_some());
    }

    #[test]
    fn completed_cannot_be_cancelled() {
        let mut order = Order::create(Uuid::new_v4(), Currency::Usd, vec![line_item()], HashMap::new()).unwrap();
        order.mark_paid().unwrap();
        order.mark_completed().unwrap();
        let err = order.cancel().unwrap_err();
        assert!(matches!(err, AppError::InvalidOrderState { .. }));
    }

    #[test]
    fn revalidate_rejects_inconsistent_persisted_state() {
        let mut order = Order::create(Uuid::new_v4(), Currency::Usd, vec![line_item()], HashMap::new()).unwrap();
        order.status = OrderStatus::Paid; // bypass transition, simulate corrupt row
        assert!(order.revalidate().is_err());
    }
}
