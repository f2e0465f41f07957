//! Tariff Domain Concerns

pub mod policies;
pub mod pricing;
pub mod products;
