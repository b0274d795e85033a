//! Money value object: `(Decimal amount, Currency)` with currency-aware
//! rounding and mismatch-safe arithmetic.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("currency mismatch: {0} vs {1}")]
    CurrencyMismatch(Currency, Currency),
    #[error("amount would go negative")]
    NegativeResult,
    #[error("amount must be non-negative")]
    NegativeAmount,
}

/// Currencies FluxPay knows how to round. Minor-unit count drives HALF_UP
/// scaling on every construction and arithmetic result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Krw,
    Jpy,
    Usd,
    Eur,
}

impl Currency {
    pub fn minor_units(&self) -> u32 {
        match self {
            Currency::Krw | Currency::Jpy => 0,
            Currency::Usd | Currency::Eur => 2,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Krw => "KRW",
            Currency::Jpy => "JPY",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_uppercase().as_str() {
            "KRW" => Some(Currency::Krw),
            "JPY" => Some(Currency::Jpy),
            "USD" => Some(Currency::Usd),
            "EUR" => Some(Currency::Eur),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A non-negative amount scaled to its currency's minor-unit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

impl Money {
    /// Construct a `Money`, rejecting negative amounts and rounding to the
    /// currency's minor-unit scale using HALF_UP.
    pub fn new(amount: Decimal, currency: Currency) -> Result<Self, MoneyError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(MoneyError::NegativeAmount);
        }
        let rounded = amount.round_dp_with_strategy(currency.minor_units(), RoundingStrategy::MidpointAwayFromZero);
        Ok(Self { amount: rounded, currency })
    }

    pub fn zero(currency: Currency) -> Self {
        Self { amount: Decimal::ZERO, currency }
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    fn check_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch(self.currency, other.currency));
        }
        Ok(())
    }

    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.check_currency(other)?;
        Money::new(self.amount + other.amount, self.currency)
    }

    pub fn subtract(&self, other: &Money) -> Result<Money, MoneyError> {
        self.check_currency(other)?;
        let result = self.amount - other.amount;
        if result.is_sign_negative() && !result.is_zero() {
            return Err(MoneyError::NegativeResult);
        }
        Money::new(result, self.currency)
    }

    pub fn multiply(&self, factor: Decimal) -> Result<Money, MoneyError> {
        if factor.is_sign_negative() {
            return Err(MoneyError::NegativeAmount);
        }
        Money::new(self.amount * factor, self.currency)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn krw_has_zero_minor_units_and_rounds_to_whole_numbers() {
        let m = Money::new(dec!(1000.6), Currency::Krw).unwrap();
        assert_eq!(m.amount(), dec!(1001));
    }

    #[test]
    fn usd_rounds_half_up_to_two_decimals() {
        let m = Money::new(dec!(10.005), Currency::Usd).unwrap();
        assert_eq!(m.amount(), dec!(10.01));
    }

    #[test]
    fn negative_construction_is_rejected() {
        assert_eq!(Money::new(dec!(-1), Currency::Usd), Err(MoneyError::NegativeAmount));
    }

    #[test]
    fn add_requires_matching_currency() {
        let usd = Money::new(dec!(10), Currency::Usd).unwrap();
        let eur = Money::new(dec!(10), Currency::Eur).unwrap();
        assert_eq!(usd.add(&eur), Err(MoneyError::CurrencyMismatch(Currency::Usd, Currency::Eur)));
    }

    #[test]
    fn subtract_never_goes_negative() {
        let a = Money::new(dec!(5), Currency::Usd).unwrap();
        let b = Money::new(dec!(10), Currency::Usd).unwrap();
        assert_eq!(a.subtract(&b), Err(MoneyError::NegativeResult));
    }

    #[test]
    fn subtract_to_exact_zero_is_fine() {
        let a = Money::new(dec!(10), Currency::Usd).unwrap();
        let result = a.subtract(&a).unwrap();
        assert!(result.is_zero());
    }

    #[test]
    fn sequence_of_add_subtract_never_goes_negative_and_stays_rounded() {
        let mut running = Money::zero(Currency::Usd);
        let deltas = [dec!(10.111), dec!(5.004), dec!(-3.333)];
        for d in deltas {
            if d.is_sign_negative() {
                let m = Money::new(-d, Currency::Usd).unwrap();
                running = running.subtract(&m).unwrap();
            } else {
                let m = Money::new(d, Currency::Usd).unwrap();
                running = running.add(&m).unwrap();
            }
            assert!(!running.amount().is_sign_negative() || running.amount().is_zero());
            assert!(running.amount().scale() <= 2);
        }
    }
}
