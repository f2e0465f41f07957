//! The resolution walk: base price + policies + context → final price.

use rust_decimal::{Decimal, prelude::FromPrimitive};
use serde::{Deserialize, Serialize};

use crate::{
    context::PricingContext,
    discount::DiscountError,
    policy::{PolicyId, PricePolicy},
};

/// Outcome of one price resolution.
///
/// Serialisable because resolutions are memoized in the cache layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingResult {
    /// Role-based base price before any policy applied.
    pub original_price: i64,
    /// Price after all committed policy applications.
    pub final_price: i64,
    /// Total amount taken off.
    pub discount_amount: i64,
    /// Policies that actually applied, in application order.
    pub applied_policies: Vec<PolicyId>,
    /// Absolute savings; equals `discount_amount`.
    pub savings: i64,
    /// Savings relative to the original price, in percent points,
    /// rounded to two decimals.
    pub savings_percentage: Decimal,
}

impl PricingResult {
    /// A zero-discount result at the given base price.
    pub fn unchanged(base_price: i64) -> Self {
        Self {
            original_price: base_price,
            final_price: base_price,
            discount_amount: 0,
            applied_policies: Vec::new(),
            savings: 0,
            savings_percentage: Decimal::ZERO,
        }
    }
}

/// Resolve a final price by walking the applicable policies.
///
/// Policies are ordered by priority descending, with the policy id as a
/// deterministic secondary key. Each policy is re-validated against the
/// context before applying; a policy only commits when it strictly lowers
/// the running price. Once an exclusive policy commits, the walk stops.
/// No applicable policies is a normal zero-discount outcome.
///
/// Usage counters are not touched here; the caller persists one increment
/// per entry in `applied_policies`.
///
/// # Errors
///
/// Returns [`DiscountError`] when a policy's discount arithmetic cannot be
/// represented.
pub fn resolve(
    base_price: i64,
    policies: &[PricePolicy],
    ctx: &PricingContext,
) -> Result<PricingResult, DiscountError> {
    let mut ordered: Vec<&PricePolicy> = policies.iter().collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

    let mut running = base_price.max(0);
    let original = running;
    let mut discount_amount = 0_i64;
    let mut applied = Vec::new();

    for policy in ordered {
        if !policy.is_applicable(ctx) {
            continue;
        }

        let candidate = policy.terms.apply(running)?;

        if candidate < running {
            discount_amount += running - candidate;
            running = candidate;
            applied.push(policy.id);

            if policy.exclusive {
                break;
            }
        }
    }

    Ok(PricingResult {
        original_price: original,
        final_price: running,
        discount_amount,
        applied_policies: applied,
        savings: discount_amount,
        savings_percentage: savings_percent(original, discount_amount),
    })
}

/// Savings as percent points of the original price, rounded to two decimals.
fn savings_percent(original: i64, savings: i64) -> Decimal {
    if original == 0 {
        return Decimal::ZERO;
    }

    let savings_dec = Decimal::from_i64(savings).unwrap_or(Decimal::ZERO);
    let original_dec = Decimal::from_i64(original).unwrap_or(Decimal::ONE);

    (savings_dec * Decimal::ONE_HUNDRED / original_dec).round_dp(2)
}
