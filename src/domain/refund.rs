use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RefundStatus {
    Requested,
    Processing,
    Completed,
    Failed,
}

impl RefundStatus {
    /// `REQUESTED -> PROCESSING -> {COMPLETED, FAILED}`.
    pub fn can_transition_to(&self, target: RefundStatus) -> bool {
        use RefundStatus::*;
        matches!((self, target), (Requested, Processing) | (Processing, Completed) | (Processing, Failed))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Requested => "REQUESTED",
            RefundStatus::Processing => "PROCESSING",
            RefundStatus::Completed => "COMPLETED",
            RefundStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "REQUESTED" => Ok(RefundStatus::Requested),
            "PROCESSING" => Ok(RefundStatus::Processing),
            "COMPLETED" => Ok(RefundStatus::Completed),
            "FAILED" => Ok(RefundStatus::Failed),
            other => Err(AppError::ValidationError(format!("unknown refund status {other}"))),
        }
    }
}

/// Generates the `ref_<16hex>` identity form used for Refund ids.
pub fn generate_refund_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("ref_{}", hex::encode(bytes))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub payment_id: Uuid,
    pub amount: Money,
    pub reason: String,
    pub status: RefundStatus,
    pub pg_refund_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Refund {
    /// Only issuable against a CONFIRMED payment; the
    /// caller is responsible for checking the payment's status before
    /// calling this constructor and passing `payment_amount` for the
    /// full-refund bound check.
    pub fn request(payment_id: Uuid, amount: Money, payment_amount: &Money, reason: String) -> Result<Self, AppError> {
        if amount.is_zero() {
            return Err(AppError::ValidationError("refund amount must be > 0".into()));
        }
        if amount.currency() != payment_amount.currency() {
            return Err(AppError::MoneyError(crate::money::MoneyError::CurrencyMismatch(
                amount.currency(),
                payment_amount.currency(),
            )));
        }
        if amount.amount() > payment_amount.amount() {
            return Err(AppError::InsufficientBalance);
        }
        let now = Utc::now();
        Ok(Self {
            id: generate_refund_id(),
            payment_id,
            amount,
            reason,
            status: RefundStatus::Requested,
            pg_refund_id: None,
            error: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn transition(&mut self, target: RefundStatus) -> Result<(), AppError> {
        if !self.status.can_transition_to(target) {
            return Err(AppError::InvalidRefundState {
                from: self.status.as_str().to_string(),
                to: target.as_str().to_string(),
            });
        }
        self.status = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn start_processing(&mut self) -> Result<(), AppError> {
        self.transition(RefundStatus::Processing)
    }

    pub fn complete(&mut self, pg_refund_id: String) -> Result<(), AppError> {
        self.transition(RefundStatus::Completed)?;
        self.pg_refund_id = Some(pg_refund_id);
        Ok(())
    }

    pub fn fail(&mut self, error: String) -> Result<(), AppError> {
        self.transition(RefundStatus::Failed)?;
        self.error = Some(error);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;
    use rust_decimal_macros::dec;

    #[test]
    fn refund_id_has_expected_shape() {
        let id = generate_refund_id();
        assert!(id.starts_with("ref_"));
        assert_eq!(id.len(), "ref_".len() + 16);
    }

    #[test]
    fn refund_cannot_exceed_payment_amount() {
        let payment_amount = Money::new(dec!(50), Currency::Usd).unwrap();
        let too_much = Money::new(dec!(100), Currency::Usd).unwrap();
        let result = Refund::request(Uuid::new_v4(), too_much, &payment_amount, "too much".into());
        assert!(matches!(result, Err(AppError::InsufficientBalance)));
    }

    #[test]
    fn full_refund_lifecycle() {
        let payment_amount = Money::new(dec!(100), Currency::Usd).unwrap();
        let mut refund = Refund::request(Uuid::new_v4(), payment_amount.clone(), &payment_amount, "customer request".into()).unwrap();
        refund.start_processing().unwrap();
        refund.complete("pg_refund_x".into()).unwrap();
        assert_eq!(refund.status, RefundStatus::Completed);
        assert_eq!(refund.pg_refund_id.as_deref(), Some("pg_refund_x"));
    }
}
