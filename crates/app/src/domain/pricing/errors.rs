//! Pricing service errors.

use tariff::DiscountError;
use thiserror::Error;

use crate::domain::{policies::PoliciesServiceError, products::ProductsServiceError};

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("product not found")]
    ProductNotFound,

    #[error(transparent)]
    Discount(#[from] DiscountError),

    #[error("pricing storage error")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<ProductsServiceError> for PricingError {
    fn from(error: ProductsServiceError) -> Self {
        match error {
            ProductsServiceError::NotFound => Self::ProductNotFound,
            other => Self::Store(Box::new(other)),
        }
    }
}

impl From<PoliciesServiceError> for PricingError {
    fn from(error: PoliciesServiceError) -> Self {
        Self::Store(Box::new(error))
    }
}
