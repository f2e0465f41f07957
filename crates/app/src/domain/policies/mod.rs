//! Price Policies

pub mod data;
pub mod errors;
pub mod records;
pub mod repository;
pub mod service;

pub use errors::PoliciesServiceError;
pub use repository::{MockPoliciesRepository, PgPoliciesRepository, PoliciesRepository};
pub use service::{MockPoliciesService, PgPoliciesService, PoliciesService};
