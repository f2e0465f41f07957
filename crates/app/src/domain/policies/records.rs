//! Policy Records

use jiff::{
    Timestamp,
    civil::{Time, Weekday},
};
use rust_decimal::Decimal;
use smallvec::SmallVec;
use tariff::{Discount, PricePolicy};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    domain::policies::errors::PoliciesServiceError,
    uuids::TypedUuid,
};

/// Policy UUID
pub type PolicyUuid = TypedUuid<PolicyRecord>;

/// Policy Record
///
/// A persisted policy: the domain rule plus its administrative envelope.
#[derive(Debug, Clone)]
pub struct PolicyRecord {
    pub name: String,
    pub policy: PricePolicy,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A row that could not be mapped back to a domain policy.
#[derive(Debug, Error)]
pub(crate) enum PolicyDecodeError {
    #[error("unknown discount kind `{0}`")]
    UnknownDiscountKind(String),

    #[error("unknown customer role `{0}`")]
    UnknownRole(String),

    #[error("missing discount value for kind `{0}`")]
    MissingDiscountValue(String),

    #[error("incomplete time-of-day window")]
    IncompleteHoursWindow,

    #[error("weekday number out of range")]
    WeekdayOutOfRange,

    #[error(transparent)]
    Calendar(#[from] jiff::Error),
}

/// Flat column values for one policy row, in bind order.
#[derive(Debug)]
pub(crate) struct PolicyColumns {
    pub uuid: Uuid,
    pub product_uuid: Option<Uuid>,
    pub categories: Vec<String>,
    pub target_role: Option<&'static str>,
    pub target_user_uuid: Option<Uuid>,
    pub regions: Vec<String>,
    pub cities: Vec<String>,
    pub starts_at: Option<Timestamp>,
    pub ends_at: Option<Timestamp>,
    pub weekdays: Option<Vec<i16>>,
    pub window_start_minute: Option<i16>,
    pub window_end_minute: Option<i16>,
    pub min_quantity: Option<i32>,
    pub max_quantity: Option<i32>,
    pub min_order_amount: Option<i64>,
    pub max_order_amount: Option<i64>,
    pub discount_kind: &'static str,
    pub discount_percentage: Option<Decimal>,
    pub discount_amount: Option<i64>,
    pub max_discount: Option<i64>,
    pub min_final_price: Option<i64>,
    pub priority: i16,
    pub active: bool,
    pub is_exclusive: bool,
    pub max_total_uses: Option<i32>,
    pub max_uses_per_user: Option<i32>,
    pub usage_count: i32,
}

impl PolicyColumns {
    /// Decompose a domain policy into column values.
    pub(crate) fn try_from_policy(policy: &PricePolicy) -> Result<Self, PoliciesServiceError> {
        let (discount_kind, discount_percentage, discount_amount) = match policy.terms.discount {
            Discount::Percentage(percent) => ("percentage", Some(percent), None),
            Discount::FixedAmount(amount) => ("fixed_amount", None, Some(amount)),
            Discount::FixedPrice(price) => ("fixed_price", None, Some(price)),
        };

        Ok(Self {
            uuid: policy.id.into_uuid(),
            product_uuid: policy.scope.product_id,
            categories: policy.scope.categories.to_vec(),
            target_role: policy.scope.target_role.map(tariff::CustomerRole::as_str),
            target_user_uuid: policy.scope.target_user_id,
            regions: policy.scope.regions.to_vec(),
            cities: policy.scope.cities.to_vec(),
            starts_at: policy.window.starts_at,
            ends_at: policy.window.ends_at,
            weekdays: policy
                .window
                .weekdays
                .as_ref()
                .map(|days| days.iter().map(|day| weekday_offset(*day)).collect()),
            window_start_minute: policy.window.hours.map(|(start, _)| minute_of_day(start)),
            window_end_minute: policy.window.hours.map(|(_, end)| minute_of_day(end)),
            min_quantity: policy.bounds.min_quantity.map(quantity_column).transpose()?,
            max_quantity: policy.bounds.max_quantity.map(quantity_column).transpose()?,
            min_order_amount: policy.bounds.min_order_amount,
            max_order_amount: policy.bounds.max_order_amount,
            discount_kind,
            discount_percentage,
            discount_amount,
            max_discount: policy.terms.max_discount,
            min_final_price: policy.terms.min_final_price,
            priority: i16::from(policy.priority),
            active: policy.active,
            is_exclusive: policy.exclusive,
            max_total_uses: policy.usage.max_total.map(quantity_column).transpose()?,
            max_uses_per_user: policy.usage.max_per_user.map(quantity_column).transpose()?,
            usage_count: quantity_column(policy.usage.used)?,
        })
    }
}

fn quantity_column(value: u32) -> Result<i32, PoliciesServiceError> {
    i32::try_from(value)
        .ok()
        .ok_or(PoliciesServiceError::InvalidData)
}

/// ISO weekday number, Monday = 1.
pub(crate) fn weekday_offset(day: Weekday) -> i16 {
    i16::from(day.to_monday_one_offset())
}

/// Weekdays from stored ISO numbers.
pub(crate) fn weekdays_from_offsets(
    offsets: &[i16],
) -> Result<SmallVec<[Weekday; 7]>, PolicyDecodeError> {
    offsets
        .iter()
        .map(|offset| {
            i8::try_from(*offset)
                .ok()
                .and_then(|offset| Weekday::from_monday_one_offset(offset).ok())
                .ok_or(PolicyDecodeError::WeekdayOutOfRange)
        })
        .collect()
}

/// Minute-of-day a time-of-day window bound is stored as.
pub(crate) fn minute_of_day(time: Time) -> i16 {
    i16::from(time.hour()) * 60 + i16::from(time.minute())
}

/// Time-of-day from a stored minute-of-day.
pub(crate) fn time_from_minute(minute: i16) -> Result<Time, PolicyDecodeError> {
    let hour = i8::try_from(minute / 60)
        .ok()
        .ok_or(PolicyDecodeError::IncompleteHoursWindow)?;
    let minute = i8::try_from(minute % 60)
        .ok()
        .ok_or(PolicyDecodeError::IncompleteHoursWindow)?;

    Ok(Time::new(hour, minute, 0, 0)?)
}
