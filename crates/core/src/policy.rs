//! Price policies: one discount rule plus its applicability constraints.

use std::fmt;

use jiff::{
    Timestamp,
    civil::{Time, Weekday},
    tz::TimeZone,
};
use rust_decimal::Decimal;
use smallvec::SmallVec;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    context::PricingContext,
    discount::{Discount, DiscountTerms},
    roles::CustomerRole,
};

/// Policy priorities are constrained to this inclusive range.
pub const PRIORITY_RANGE: std::ops::RangeInclusive<u8> = 1..=100;

/// Identifier of a price policy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct PolicyId(Uuid);

impl PolicyId {
    /// Fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Unwrap to the underlying UUID.
    pub const fn into_uuid(self) -> Uuid {
        self.0
    }
}

impl Default for PolicyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// What the policy is scoped to. Empty or `None` discriminators match
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyScope {
    /// Only this product, when set.
    pub product_id: Option<Uuid>,
    /// Only products in one of these categories or tags, when non-empty.
    pub categories: SmallVec<[String; 4]>,
    /// Only this customer role, when set.
    pub target_role: Option<CustomerRole>,
    /// Only this user, when set.
    pub target_user_id: Option<Uuid>,
    /// Only these delivery regions, when non-empty.
    pub regions: SmallVec<[String; 2]>,
    /// Only these delivery cities, when non-empty.
    pub cities: SmallVec<[String; 2]>,
}

/// When the policy is in effect. Missing bounds are open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyWindow {
    /// Start of validity.
    pub starts_at: Option<Timestamp>,
    /// End of validity.
    pub ends_at: Option<Timestamp>,
    /// Weekdays the policy is active on, when set. Evaluated in UTC.
    pub weekdays: Option<SmallVec<[Weekday; 7]>>,
    /// Time-of-day window, when set. Evaluated in UTC; a window whose start
    /// is after its end wraps past midnight.
    pub hours: Option<(Time, Time)>,
}

/// Quantity and order-amount bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyBounds {
    /// Minimum quantity for the policy to apply.
    pub min_quantity: Option<u32>,
    /// Maximum quantity for the policy to apply.
    pub max_quantity: Option<u32>,
    /// Minimum order amount (minor units) for the policy to apply.
    pub min_order_amount: Option<i64>,
    /// Maximum order amount (minor units) for the policy to apply.
    pub max_order_amount: Option<i64>,
}

/// Usage caps and the running counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageCaps {
    /// Maximum total number of applications.
    pub max_total: Option<u32>,
    /// Maximum applications per user. Stored and validated; enforcement
    /// requires a per-user usage ledger kept by the application layer.
    pub max_per_user: Option<u32>,
    /// Applications so far.
    pub used: u32,
}

impl UsageCaps {
    /// Whether the total cap has been reached.
    pub fn exhausted(&self) -> bool {
        self.max_total.is_some_and(|cap| self.used >= cap)
    }
}

/// A single discount rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricePolicy {
    /// Identifier.
    pub id: PolicyId,
    /// Scope discriminators.
    pub scope: PolicyScope,
    /// Validity window.
    pub window: PolicyWindow,
    /// Quantity and amount bounds.
    pub bounds: PolicyBounds,
    /// Discount definition.
    pub terms: DiscountTerms,
    /// Priority, higher applies first. Must lie in [`PRIORITY_RANGE`].
    pub priority: u8,
    /// Inactive policies never apply; deactivation is the soft delete.
    pub active: bool,
    /// Once an exclusive policy applies, no further policy may.
    pub exclusive: bool,
    /// Usage caps.
    pub usage: UsageCaps,
}

/// A violated policy invariant, reported at create or update time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyValidationError {
    /// Discount value is negative.
    #[error("discount value must not be negative")]
    NegativeDiscountValue,

    /// Percentage discount above 100.
    #[error("percentage discount must not exceed 100")]
    PercentageAboveHundred,

    /// `min_quantity` greater than `max_quantity`.
    #[error("minimum quantity exceeds maximum quantity")]
    QuantityBoundsInverted,

    /// `min_order_amount` greater than `max_order_amount`.
    #[error("minimum order amount exceeds maximum order amount")]
    OrderAmountBoundsInverted,

    /// `starts_at` not strictly before `ends_at`.
    #[error("policy start must be before policy end")]
    DateWindowInverted,

    /// Priority outside [`PRIORITY_RANGE`].
    #[error("priority must lie between 1 and 100")]
    PriorityOutOfRange,
}

impl PricePolicy {
    /// A minimal active policy with the given discount and priority.
    pub fn new(id: PolicyId, discount: Discount, priority: u8) -> Self {
        Self {
            id,
            scope: PolicyScope::default(),
            window: PolicyWindow::default(),
            bounds: PolicyBounds::default(),
            terms: DiscountTerms::new(discount),
            priority,
            active: true,
            exclusive: false,
            usage: UsageCaps::default(),
        }
    }

    /// Check every data invariant, reporting the first violated rule.
    ///
    /// # Errors
    ///
    /// Returns the specific [`PolicyValidationError`] that was violated.
    pub fn validate(&self) -> Result<(), PolicyValidationError> {
        match &self.terms.discount {
            Discount::Percentage(percent) => {
                if percent.is_sign_negative() {
                    return Err(PolicyValidationError::NegativeDiscountValue);
                }

                if *percent > Decimal::ONE_HUNDRED {
                    return Err(PolicyValidationError::PercentageAboveHundred);
                }
            }
            Discount::FixedAmount(amount) | Discount::FixedPrice(amount) => {
                if *amount < 0 {
                    return Err(PolicyValidationError::NegativeDiscountValue);
                }
            }
        }

        if let (Some(min), Some(max)) = (self.bounds.min_quantity, self.bounds.max_quantity)
            && min > max
        {
            return Err(PolicyValidationError::QuantityBoundsInverted);
        }

        if let (Some(min), Some(max)) = (self.bounds.min_order_amount, self.bounds.max_order_amount)
            && min > max
        {
            return Err(PolicyValidationError::OrderAmountBoundsInverted);
        }

        if let (Some(start), Some(end)) = (self.window.starts_at, self.window.ends_at)
            && start >= end
        {
            return Err(PolicyValidationError::DateWindowInverted);
        }

        if !PRIORITY_RANGE.contains(&self.priority) {
            return Err(PolicyValidationError::PriorityOutOfRange);
        }

        Ok(())
    }

    /// The authoritative applicability check.
    ///
    /// Repositories pre-filter loosely for query simplicity; this check is
    /// the source of truth and re-validates every constraint against the
    /// context. A policy past its usage cap is simply not applicable.
    pub fn is_applicable(&self, ctx: &PricingContext) -> bool {
        if !self.active || self.usage.exhausted() {
            return false;
        }

        if !self.window_contains(ctx.evaluated_at) {
            return false;
        }

        if self
            .scope
            .product_id
            .is_some_and(|product| product != ctx.product_id)
        {
            return false;
        }

        if !self.scope.categories.is_empty()
            && !self
                .scope
                .categories
                .iter()
                .any(|category| ctx.categories.contains(category))
        {
            return false;
        }

        if self.scope.target_role.is_some_and(|role| role != ctx.role) {
            return false;
        }

        if self.scope.target_user_id.is_some() && self.scope.target_user_id != ctx.user_id {
            return false;
        }

        if !list_matches(&self.scope.regions, ctx.region.as_deref()) {
            return false;
        }

        if !list_matches(&self.scope.cities, ctx.city.as_deref()) {
            return false;
        }

        if self
            .bounds
            .min_quantity
            .is_some_and(|min| ctx.quantity < min)
            || self
                .bounds
                .max_quantity
                .is_some_and(|max| ctx.quantity > max)
        {
            return false;
        }

        if self
            .bounds
            .min_order_amount
            .is_some_and(|min| ctx.order_amount < min)
            || self
                .bounds
                .max_order_amount
                .is_some_and(|max| ctx.order_amount > max)
        {
            return false;
        }

        true
    }

    fn window_contains(&self, at: Timestamp) -> bool {
        if self.window.starts_at.is_some_and(|start| at < start) {
            return false;
        }

        if self.window.ends_at.is_some_and(|end| at > end) {
            return false;
        }

        if self.window.weekdays.is_none() && self.window.hours.is_none() {
            return true;
        }

        let civil = at.to_zoned(TimeZone::UTC).datetime();

        if let Some(weekdays) = &self.window.weekdays
            && !weekdays.contains(&civil.weekday())
        {
            return false;
        }

        if let Some((start, end)) = self.window.hours {
            let time = civil.time();

            let inside = if start <= end {
                time >= start && time <= end
            } else {
                // Window wraps past midnight.
                time >= start || time <= end
            };

            if !inside {
                return false;
            }
        }

        true
    }
}

/// Empty lists match everything; non-empty lists require a known,
/// contained value.
fn list_matches<const N: usize>(list: &SmallVec<[String; N]>, value: Option<&str>) -> bool {
    if list.is_empty() {
        return true;
    }

    value.is_some_and(|value| list.iter().any(|entry| entry == value))
}

#[cfg(test)]
mod tests {
    use jiff::civil::time;
    use smallvec::smallvec;
    use testresult::TestResult;

    use super::*;

    fn percent_policy(percent: i64) -> PricePolicy {
        PricePolicy::new(
            PolicyId::new(),
            Discount::Percentage(Decimal::from(percent)),
            50,
        )
    }

    fn retail_context() -> PricingContext {
        let mut ctx = PricingContext::new(Uuid::now_v7(), CustomerRole::Retail, 1);
        ctx.evaluated_at = "2026-08-10T12:00:00Z".parse().expect("valid timestamp");
        ctx
    }

    #[test]
    fn valid_policy_passes_validation() -> TestResult {
        percent_policy(10).validate()?;

        Ok(())
    }

    #[test]
    fn percentage_above_hundred_is_rejected() {
        assert_eq!(
            percent_policy(150).validate(),
            Err(PolicyValidationError::PercentageAboveHundred)
        );
    }

    #[test]
    fn negative_discount_values_are_rejected() {
        assert_eq!(
            percent_policy(-5).validate(),
            Err(PolicyValidationError::NegativeDiscountValue)
        );

        let fixed = PricePolicy::new(PolicyId::new(), Discount::FixedAmount(-100), 50);

        assert_eq!(
            fixed.validate(),
            Err(PolicyValidationError::NegativeDiscountValue)
        );
    }

    #[test]
    fn inverted_quantity_bounds_are_rejected() {
        let mut policy = percent_policy(10);
        policy.bounds.min_quantity = Some(10);
        policy.bounds.max_quantity = Some(5);

        assert_eq!(
            policy.validate(),
            Err(PolicyValidationError::QuantityBoundsInverted)
        );
    }

    #[test]
    fn inverted_amount_bounds_are_rejected() {
        let mut policy = percent_policy(10);
        policy.bounds.min_order_amount = Some(10_000);
        policy.bounds.max_order_amount = Some(5_000);

        assert_eq!(
            policy.validate(),
            Err(PolicyValidationError::OrderAmountBoundsInverted)
        );
    }

    #[test]
    fn inverted_date_window_is_rejected() {
        let mut policy = percent_policy(10);
        policy.window.starts_at = Some("2026-02-01T00:00:00Z".parse().expect("valid timestamp"));
        policy.window.ends_at = Some("2026-01-01T00:00:00Z".parse().expect("valid timestamp"));

        assert_eq!(
            policy.validate(),
            Err(PolicyValidationError::DateWindowInverted)
        );
    }

    #[test]
    fn priority_out_of_range_is_rejected() {
        let mut policy = percent_policy(10);
        policy.priority = 0;

        assert_eq!(
            policy.validate(),
            Err(PolicyValidationError::PriorityOutOfRange)
        );

        policy.priority = 101;

        assert_eq!(
            policy.validate(),
            Err(PolicyValidationError::PriorityOutOfRange)
        );
    }

    #[test]
    fn unconstrained_policy_applies() {
        assert!(percent_policy(10).is_applicable(&retail_context()));
    }

    #[test]
    fn inactive_policy_never_applies() {
        let mut policy = percent_policy(10);
        policy.active = false;

        assert!(!policy.is_applicable(&retail_context()));
    }

    #[test]
    fn exhausted_usage_cap_excludes_policy() {
        let mut policy = percent_policy(10);
        policy.usage.max_total = Some(1);
        policy.usage.used = 1;

        assert!(!policy.is_applicable(&retail_context()));
    }

    #[test]
    fn date_window_bounds_are_inclusive_and_open_ended() {
        let mut policy = percent_policy(10);
        policy.window.starts_at = Some("2026-09-01T00:00:00Z".parse().expect("valid timestamp"));

        // Context is evaluated before the window opens.
        assert!(!policy.is_applicable(&retail_context()));

        policy.window.starts_at = Some("2026-08-01T00:00:00Z".parse().expect("valid timestamp"));
        policy.window.ends_at = Some("2026-08-31T00:00:00Z".parse().expect("valid timestamp"));

        assert!(policy.is_applicable(&retail_context()));
    }

    #[test]
    fn weekday_window_is_enforced() {
        let mut policy = percent_policy(10);
        // 2026-08-10 is a Monday.
        policy.window.weekdays = Some(smallvec![Weekday::Monday]);

        assert!(policy.is_applicable(&retail_context()));

        policy.window.weekdays = Some(smallvec![Weekday::Sunday]);

        assert!(!policy.is_applicable(&retail_context()));
    }

    #[test]
    fn hour_window_wraps_past_midnight() {
        let mut policy = percent_policy(10);
        policy.window.hours = Some((time(22, 0, 0, 0), time(2, 0, 0, 0)));

        // Context is at 12:00 UTC, outside the late-night window.
        assert!(!policy.is_applicable(&retail_context()));

        policy.window.hours = Some((time(9, 0, 0, 0), time(17, 0, 0, 0)));

        assert!(policy.is_applicable(&retail_context()));
    }

    #[test]
    fn product_scope_must_match() {
        let ctx = retail_context();

        let mut policy = percent_policy(10);
        policy.scope.product_id = Some(ctx.product_id);

        assert!(policy.is_applicable(&ctx));

        policy.scope.product_id = Some(Uuid::now_v7());

        assert!(!policy.is_applicable(&ctx));
    }

    #[test]
    fn category_scope_requires_overlap() {
        let mut ctx = retail_context();
        ctx.categories = smallvec!["supplements".to_string()];

        let mut policy = percent_policy(10);
        policy.scope.categories = smallvec!["supplements".to_string(), "devices".to_string()];

        assert!(policy.is_applicable(&ctx));

        policy.scope.categories = smallvec!["cosmetics".to_string()];

        assert!(!policy.is_applicable(&ctx));
    }

    #[test]
    fn role_and_user_scopes_must_match() {
        let mut ctx = retail_context();
        let user = Uuid::now_v7();
        ctx.user_id = Some(user);

        let mut policy = percent_policy(10);
        policy.scope.target_role = Some(CustomerRole::Wholesale);

        assert!(!policy.is_applicable(&ctx));

        policy.scope.target_role = Some(CustomerRole::Retail);
        policy.scope.target_user_id = Some(user);

        assert!(policy.is_applicable(&ctx));

        policy.scope.target_user_id = Some(Uuid::now_v7());

        assert!(!policy.is_applicable(&ctx));
    }

    #[test]
    fn region_scope_requires_known_matching_region() {
        let mut policy = percent_policy(10);
        policy.scope.regions = smallvec!["seoul".to_string()];

        // Unknown region never matches a region-scoped policy.
        assert!(!policy.is_applicable(&retail_context()));

        let mut ctx = retail_context();
        ctx.region = Some("seoul".to_string());

        assert!(policy.is_applicable(&ctx));
    }

    #[test]
    fn quantity_bounds_are_enforced() {
        let mut policy = percent_policy(10);
        policy.bounds.min_quantity = Some(5);

        let mut ctx = retail_context();
        ctx.quantity = 3;

        assert!(!policy.is_applicable(&ctx));

        ctx.quantity = 5;

        assert!(policy.is_applicable(&ctx));
    }

    #[test]
    fn order_amount_bounds_are_enforced() {
        let mut policy = percent_policy(10);
        policy.bounds.min_order_amount = Some(10_000);

        let mut ctx = retail_context();
        ctx.order_amount = 9_999;

        assert!(!policy.is_applicable(&ctx));

        ctx.order_amount = 10_000;

        assert!(policy.is_applicable(&ctx));
    }
}
