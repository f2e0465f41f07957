//! Customer roles and role-based base prices.

use serde::{Deserialize, Serialize};

/// Role of the customer a price is being resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerRole {
    /// Ordinary storefront customer.
    Retail,
    /// Registered business buyer.
    Business,
    /// Bulk purchaser.
    Wholesale,
    /// Affiliate partner.
    Affiliate,
    /// Regional distributor.
    Distributor,
}

impl CustomerRole {
    /// Stable lowercase name, used in cache keys and storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Retail => "retail",
            Self::Business => "business",
            Self::Wholesale => "wholesale",
            Self::Affiliate => "affiliate",
            Self::Distributor => "distributor",
        }
    }

    /// Parse a stored role name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "retail" => Some(Self::Retail),
            "business" => Some(Self::Business),
            "wholesale" => Some(Self::Wholesale),
            "affiliate" => Some(Self::Affiliate),
            "distributor" => Some(Self::Distributor),
            _ => None,
        }
    }
}

impl std::fmt::Display for CustomerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-role price points of a product, in minor currency units.
///
/// Wholesale and affiliate prices are optional; resolution falls back to the
/// retail price when the role-specific price is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPrices {
    /// Retail price, always present.
    pub retail: i64,
    /// Wholesale price for business and wholesale buyers.
    pub wholesale: Option<i64>,
    /// Affiliate price for affiliates and distributors.
    pub affiliate: Option<i64>,
}

impl ProductPrices {
    /// Base price for the given role, before any policy applies.
    pub fn base_for(&self, role: CustomerRole) -> i64 {
        match role {
            CustomerRole::Business | CustomerRole::Wholesale => {
                self.wholesale.unwrap_or(self.retail)
            }
            CustomerRole::Affiliate | CustomerRole::Distributor => {
                self.affiliate.unwrap_or(self.retail)
            }
            CustomerRole::Retail => self.retail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRICES: ProductPrices = ProductPrices {
        retail: 10_000,
        wholesale: Some(8_000),
        affiliate: Some(9_000),
    };

    #[test]
    fn wholesale_roles_get_wholesale_price() {
        assert_eq!(PRICES.base_for(CustomerRole::Business), 8_000);
        assert_eq!(PRICES.base_for(CustomerRole::Wholesale), 8_000);
    }

    #[test]
    fn affiliate_roles_get_affiliate_price() {
        assert_eq!(PRICES.base_for(CustomerRole::Affiliate), 9_000);
        assert_eq!(PRICES.base_for(CustomerRole::Distributor), 9_000);
    }

    #[test]
    fn retail_gets_retail_price() {
        assert_eq!(PRICES.base_for(CustomerRole::Retail), 10_000);
    }

    #[test]
    fn missing_role_price_falls_back_to_retail() {
        let prices = ProductPrices {
            retail: 10_000,
            wholesale: None,
            affiliate: None,
        };

        assert_eq!(prices.base_for(CustomerRole::Wholesale), 10_000);
        assert_eq!(prices.base_for(CustomerRole::Distributor), 10_000);
    }

    #[test]
    fn role_names_round_trip() {
        for role in [
            CustomerRole::Retail,
            CustomerRole::Business,
            CustomerRole::Wholesale,
            CustomerRole::Affiliate,
            CustomerRole::Distributor,
        ] {
            assert_eq!(CustomerRole::parse(role.as_str()), Some(role));
        }

        assert_eq!(CustomerRole::parse("admin"), None);
    }
}
