use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Ready,
    Processing,
    Approved,
    Confirmed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    /// `READY -> PROCESSING -> APPROVED -> CONFIRMED`; `* -> FAILED` from
    /// READY/PROCESSING/APPROVED; `CONFIRMED -> REFUNDED`. FAILED and
    /// REFUNDED are terminal.
    pub fn can_transition_to(&self, target: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, target),
            (Ready, Processing) | (Processing, Approved) | (Approved, Confirmed) |
            (Ready, Failed) | (Processing, Failed) | (Approved, Failed) |
            (Confirmed, Refunded)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Failed | PaymentStatus::Refunded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Ready => "READY",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Approved => "APPROVED",
            PaymentStatus::Confirmed => "CONFIRMED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "READY" => Ok(PaymentStatus::Ready),
            "PROCESSING" => Ok(PaymentStatus::Processing),
            "APPROVED" => Ok(PaymentStatus::Approved),
            "CONFIRMED" => Ok(PaymentStatus::Confirmed),
            "FAILED" => Ok(PaymentStatus::Failed),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            other => Err(AppError::ValidationError(format!("unknown payment status {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    VirtualAccount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount: Money,
    pub status: PaymentStatus,
    pub method: PaymentMethod,
    pub pg_transaction_id: Option<String>,
    pub pg_payment_key: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn create(order_id: Uuid, amount: Money, method: PaymentMethod) -> Result<Self, AppError> {
        if amount.is_zero() {
            return Err(AppError::ValidationError("payment amount must be > 0".into()));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            order_id,
            amount,
            status: PaymentStatus::Ready,
            method,
            pg_transaction_id: None,
            pg_payment_key: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            approved_at: None,
            confirmed_at: None,
        })
    }

    fn transition(&mut self, target: PaymentStatus) -> Result<(), AppError> {
        if !self.status.can_transition_to(target) {
            return Err(AppError::InvalidPaymentState {
                from: self.status.as_str().to_string(),
                to: target.as_str().to_string(),
            });
        }
        self.status = target;
        self.updated_at = Utc::now();
        match target {
            PaymentStatus::Approved => self.approved_at = Some(self.updated_at),
            PaymentStatus::Confirmed => self.confirmed_at = Some(self.updated_at),
            _ => {}
        }
        Ok(())
    }

    pub fn start_processing(&mut self) -> Result<(), AppError> {
        self.transition(PaymentStatus::Processing)
    }

    pub fn approve(&mut self, pg_transaction_id: String, pg_payment_key: String) -> Result<(), AppError> {
        self.transition(PaymentStatus::Approved)?;
        self.pg_transaction_id = Some(pg_transaction_id);
        self.pg_payment_key = Some(pg_payment_key);
        Ok(())
    }

    pub fn confirm(&mut self) -> Result<(), AppError> {
        self.transition(PaymentStatus::Confirmed)
    }

    pub fn fail(&mut self, reason: String) -> Result<(), AppError> {
        self.transition(PaymentStatus::Failed)?;
        self.failure_reason = Some(reason);
        Ok(())
    }

    pub fn mark_refunded(&mut self) -> Result<(), AppError> {
        self.transition(PaymentStatus::Refunded)
    }

    pub fn revalidate(&self) -> Result<(), AppError> {
        if self.amount.is_zero() {
            return Err(AppError::ValidationError(format!("payment {} has zero amount", self.id)));
        }
        if matches!(self.status, PaymentStatus::Approved | PaymentStatus::Confirmed) && self.approved_at.is_none() {
            return Err(AppError::ValidationError(format!(
                "payment {} has status {} but no approved_at",
                self.id,
                self.status.as_str()
            )));
        }
        if self.status == PaymentStatus::Confirmed && self.confirmed_at.is_none() {
            return Err(AppError::ValidationError(format!("payment {} is CONFIRMED but has no confirmed_at", self.id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;
    use rust_decimal_macros::dec;

    fn sample() -> Payment {
        Payment::create(Uuid::new_v4(), Money::new(dec!(100), Currency::Usd).unwrap(), PaymentMethod::Card).unwrap()
    }

    #[test]
    fn zero_amount_is_rejected() {
        let result = Payment::create(Uuid::new_v4(), Money::zero(Currency::Usd), PaymentMethod::Card);
        assert!(result.is_err());
    }

    #[test]
    fn full_happy_path() {
        let mut p = sample();
        p.start_processing().unwrap();
        p.approve("tx_1".into(), "key_1".into()).unwrap();
        p.confirm().unwrap();
        assert_eq!(p.status, PaymentStatus::Confirmed);
        assert!(p.confirmed_at.is_some());
    }

    #[test]
    fn failed_and_refunded_are_terminal() {
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Refunded.is_terminal());
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Ready));
    }

    #[test]
    fn can_fail_from_any_non_terminal_pre_confirm_state() {
        let mut p = sample();
        p.fail("declined".into()).unwrap();
        assert_eq!(p.status, PaymentStatus::Failed);
        assert_eq!(p.failure_reason.as_deref(), Some("declined"));
    }

    #[test]
    fn confirmed_can_only_move_to_refunded() {
        let mut p = sample();
        p.start_processing().unwrap();
        p.approve("tx".into(), "key".into()).unwrap();
        p.confirm().unwrap();
        assert!(p.fail("too late".into()).is_err());
        p.mark_refunded().unwrap();
        assert_eq!(p.status, PaymentStatus::Refunded);
    }
}
