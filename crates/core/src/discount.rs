//! Discount kinds and their arithmetic.
//!
//! All money amounts are integer minor units. Percentage application uses
//! [`rust_decimal`] and rounds half away from zero to the nearest minor unit.

use rust_decimal::{
    Decimal, RoundingStrategy,
    prelude::{FromPrimitive, ToPrimitive},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to discount arithmetic.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscountError {
    /// A percentage calculation overflowed or could not be represented
    /// in minor units.
    #[error("percentage conversion overflowed or was not finite")]
    PercentConversion,

    /// Fixed-amount subtraction overflowed `i64`.
    #[error("discount amount arithmetic overflowed")]
    AmountOverflow,
}

/// One discount definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Discount {
    /// Reduce the running price by a percentage of itself.
    Percentage(Decimal),
    /// Subtract a fixed amount from the running price.
    FixedAmount(i64),
    /// Replace the running price with a fixed price.
    FixedPrice(i64),
}

/// A discount together with its clamping rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountTerms {
    /// The discount itself.
    pub discount: Discount,
    /// Upper bound on the discount amount taken off in one application.
    pub max_discount: Option<i64>,
    /// Lower bound the discounted price may never fall below.
    pub min_final_price: Option<i64>,
}

impl DiscountTerms {
    /// Plain terms without cap or floor.
    pub const fn new(discount: Discount) -> Self {
        Self {
            discount,
            max_discount: None,
            min_final_price: None,
        }
    }

    /// Apply these terms to a running price.
    ///
    /// The result is clamped to the `min_final_price` floor when one is set
    /// and never falls below zero. The result may equal or exceed `price`;
    /// callers decide whether a non-improving application counts.
    ///
    /// # Errors
    ///
    /// Returns [`DiscountError`] when percentage or amount arithmetic cannot
    /// be represented.
    pub fn apply(&self, price: i64) -> Result<i64, DiscountError> {
        let discounted = match &self.discount {
            Discount::Percentage(percent) => {
                let mut off = percent_of_minor(*percent, price)?;

                if let Some(cap) = self.max_discount {
                    off = off.min(cap);
                }

                price.checked_sub(off).ok_or(DiscountError::AmountOverflow)?
            }
            Discount::FixedAmount(amount) => price
                .checked_sub(*amount)
                .ok_or(DiscountError::AmountOverflow)?,
            Discount::FixedPrice(fixed) => *fixed,
        };

        let floored = match self.min_final_price {
            Some(floor) => discounted.max(floor),
            None => discounted,
        };

        Ok(floored.max(0))
    }
}

/// Calculate `percent` of `minor`, rounded half away from zero.
fn percent_of_minor(percent: Decimal, minor: i64) -> Result<i64, DiscountError> {
    let Some(minor) = Decimal::from_i64(minor) else {
        return Err(DiscountError::PercentConversion);
    };

    let Some(scaled) = percent.checked_mul(minor) else {
        return Err(DiscountError::PercentConversion);
    };

    let Some(applied) = scaled.checked_div(Decimal::ONE_HUNDRED) else {
        return Err(DiscountError::PercentConversion);
    };

    applied
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or(DiscountError::PercentConversion)
}
