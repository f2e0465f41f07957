//! Pricing context.

use jiff::Timestamp;
use smallvec::SmallVec;
use uuid::Uuid;

use crate::roles::CustomerRole;

/// Read-only description of who and what is being priced.
///
/// Built per resolution; never persisted. `categories` carries the product's
/// category and tag memberships so category-scoped policies can match.
#[derive(Debug, Clone)]
pub struct PricingContext {
    /// Product being priced.
    pub product_id: Uuid,
    /// Role of the requesting user.
    pub role: CustomerRole,
    /// Requesting user, when known.
    pub user_id: Option<Uuid>,
    /// Quantity requested.
    pub quantity: u32,
    /// Cumulative order amount in minor units, pre-discount.
    pub order_amount: i64,
    /// Delivery region, when known.
    pub region: Option<String>,
    /// Delivery city, when known.
    pub city: Option<String>,
    /// Category and tag memberships of the product.
    pub categories: SmallVec<[String; 4]>,
    /// Instant the resolution is evaluated at.
    pub evaluated_at: Timestamp,
}

impl PricingContext {
    /// Context with the given essentials and open everything else,
    /// evaluated now.
    pub fn new(product_id: Uuid, role: CustomerRole, quantity: u32) -> Self {
        Self {
            product_id,
            role,
            user_id: None,
            quantity,
            order_amount: 0,
            region: None,
            city: None,
            categories: SmallVec::new(),
            evaluated_at: Timestamp::now(),
        }
    }
}
