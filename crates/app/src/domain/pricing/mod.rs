//! Pricing

pub mod errors;
pub mod service;

pub use errors::PricingError;
pub use service::{CachedPricingService, MockPricingService, OrderLine, PricingService};
