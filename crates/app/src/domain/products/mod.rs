//! Products

pub mod data;
pub mod errors;
pub mod records;
pub mod repository;

pub use errors::ProductsServiceError;
pub use repository::{MockProductsRepository, PgProductsRepository, ProductsRepository};
