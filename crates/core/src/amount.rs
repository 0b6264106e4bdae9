//! Non-negative decimal money amount.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount cannot be negative: {0}")]
    Negative(Decimal),
}

/// A decimal amount that is never below zero.
///
/// Account balances and transfer amounts are both `Amount`s, so a negative
/// balance cannot be represented at all. Subtraction that would go below zero
/// returns `None` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value < Decimal::ZERO {
            Err(AmountError::Negative(value))
        } else {
            Ok(Self(value))
        }
    }

    #[inline]
    pub const fn value(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns `None` when the result would be negative (or overflow).
    pub fn checked_sub(&self, other: Amount) -> Option<Amount> {
        let result = self.0.checked_sub(other.0)?;
        if result < Decimal::ZERO {
            None
        } else {
            Some(Amount(result))
        }
    }
}

impl core::fmt::Display for Amount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl Default for Amount {
    fn default() -> Self {
        Self::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn amount(v: i64) -> Amount {
        Amount::new(Decimal::new(v, 0)).unwrap()
    }

    #[test]
    fn negative_values_are_rejected() {
        assert_eq!(
            Amount::new(Decimal::new(-1, 2)),
            Err(AmountError::Negative(Decimal::new(-1, 2)))
        );
    }

    #[test]
    fn negative_zero_is_zero() {
        let mut neg_zero = Decimal::ZERO;
        neg_zero.set_sign_negative(true);
        assert!(Amount::new(neg_zero).unwrap().is_zero());
    }

    #[test]
    fn subtraction_never_goes_below_zero() {
        assert_eq!(amount(500).checked_sub(amount(200)), Some(amount(300)));
        assert_eq!(amount(100).checked_sub(amount(100)), Some(Amount::ZERO));
        assert_eq!(amount(100).checked_sub(amount(150)), None);
    }

    #[test]
    fn deserialization_enforces_the_invariant() {
        let ok: Amount = serde_json::from_str("\"12.50\"").unwrap();
        assert_eq!(ok.value(), Decimal::new(1250, 2));
        assert!(serde_json::from_str::<Amount>("\"-3\"").is_err());
    }
}
