//! Products Data

use crate::domain::products::records::ProductUuid;

/// New Product Data
#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub uuid: ProductUuid,
    pub name: String,
    pub retail_price: i64,
    pub wholesale_price: Option<i64>,
    pub affiliate_price: Option<i64>,
    pub categories: Vec<String>,
}
