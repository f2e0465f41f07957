//! Tariff pricing domain.
//!
//! Pure, synchronous pricing logic: discount policies, their applicability
//! rules, and the resolution walk that turns a base price plus a set of
//! policies into a final price. No I/O lives here; repositories and caching
//! belong to the application layer.

pub mod context;
pub mod discount;
pub mod policy;
pub mod resolution;
pub mod roles;

pub use context::PricingContext;
pub use discount::{Discount, DiscountError, DiscountTerms};
pub use policy::{
    PolicyBounds, PolicyId, PolicyScope, PolicyValidationError, PolicyWindow, PricePolicy,
    UsageCaps,
};
pub use resolution::{PricingResult, resolve};
pub use roles::{CustomerRole, ProductPrices};
