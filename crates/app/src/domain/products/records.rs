//! Product Records

use jiff::Timestamp;
use tariff::{CustomerRole, ProductPrices};

use crate::uuids::TypedUuid;

/// Product UUID
pub type ProductUuid = TypedUuid<ProductRecord>;

/// Product Record
#[derive(Debug, Clone)]
pub struct ProductRecord {
    pub uuid: ProductUuid,
    pub name: String,
    /// Retail price in minor units; the fallback for every role.
    pub retail_price: i64,
    pub wholesale_price: Option<i64>,
    pub affiliate_price: Option<i64>,
    pub categories: Vec<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl ProductRecord {
    /// Role-keyed price fields of this product.
    #[must_use]
    pub fn prices(&self) -> ProductPrices {
        ProductPrices {
            retail: self.retail_price,
            wholesale: self.wholesale_price,
            affiliate: self.affiliate_price,
        }
    }

    /// Base price for a role, falling back to retail.
    #[must_use]
    pub fn base_price_for(&self, role: CustomerRole) -> i64 {
        self.prices().base_for(role)
    }
}
