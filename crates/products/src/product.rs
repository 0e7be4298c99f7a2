use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tillpoint_core::{DomainError, DomainResult, Entity, Money, ProductId, VendorId};

/// Tax rates are basis points; 10 000 bps is 100%.
pub const MAX_TAX_RATE_BPS: u32 = 10_000;

/// Input for registering a catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub vendor_id: Option<VendorId>,
    /// Selling price per unit.
    pub base_price: Money,
    /// Purchase cost per unit, used when proposing reorders.
    pub unit_cost: Money,
    /// Per-product sales tax override in basis points. `None` uses the configured default.
    pub tax_rate_bps: Option<u32>,
    pub reorder_level: i64,
    pub reorder_quantity: i64,
    /// Stock on hand at registration; recorded as an `initial` adjustment.
    #[serde(default)]
    pub opening_quantity: i64,
}

impl NewProduct {
    pub fn validate(&self) -> DomainResult<()> {
        if self.sku.trim().is_empty() {
            return Err(DomainError::validation("SKU cannot be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if self.base_price.is_negative() {
            return Err(DomainError::validation("base_price cannot be negative"));
        }
        if self.unit_cost.is_negative() {
            return Err(DomainError::validation("unit_cost cannot be negative"));
        }
        if let Some(rate) = self.tax_rate_bps {
            if rate > MAX_TAX_RATE_BPS {
                return Err(DomainError::validation(format!(
                    "tax_rate_bps cannot exceed {MAX_TAX_RATE_BPS}"
                )));
            }
        }
        if self.reorder_level < 0 {
            return Err(DomainError::validation("reorder_level cannot be negative"));
        }
        if self.reorder_quantity < 0 {
            return Err(DomainError::validation("reorder_quantity cannot be negative"));
        }
        if self.opening_quantity < 0 {
            return Err(DomainError::validation("opening_quantity cannot be negative"));
        }
        Ok(())
    }
}

/// Catalog product.
///
/// `quantity_in_stock` is deliberately not a public field: the inventory ledger is
/// the only component that moves it, and storage adapters restore it when loading
/// a row. Products are never destroyed; `is_active = false` is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub vendor_id: Option<VendorId>,
    pub base_price: Money,
    pub unit_cost: Money,
    pub tax_rate_bps: Option<u32>,
    pub reorder_level: i64,
    pub reorder_quantity: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    quantity_in_stock: i64,
}

impl Product {
    /// Build a new, active product with zero stock.
    ///
    /// SKU uniqueness cannot be checked here; the storage layer enforces it.
    pub fn register(id: ProductId, input: &NewProduct, now: DateTime<Utc>) -> DomainResult<Self> {
        input.validate()?;
        Ok(Self {
            id,
            sku: input.sku.trim().to_string(),
            name: input.name.trim().to_string(),
            vendor_id: input.vendor_id,
            base_price: input.base_price,
            unit_cost: input.unit_cost,
            tax_rate_bps: input.tax_rate_bps,
            reorder_level: input.reorder_level,
            reorder_quantity: input.reorder_quantity,
            is_active: true,
            created_at: now,
            updated_at: now,
            quantity_in_stock: 0,
        })
    }

    /// Attach the persisted quantity to a product loaded from storage.
    pub fn with_stored_quantity(mut self, quantity_in_stock: i64) -> Self {
        self.quantity_in_stock = quantity_in_stock;
        self
    }

    pub fn quantity_in_stock(&self) -> i64 {
        self.quantity_in_stock
    }

    /// Sales tax rate for this product, falling back to the configured default.
    pub fn effective_tax_rate_bps(&self, default_rate_bps: u32) -> u32 {
        self.tax_rate_bps.unwrap_or(default_rate_bps)
    }

    /// Whether the product is at or below its reorder threshold.
    pub fn needs_reorder(&self) -> bool {
        self.is_active && self.quantity_in_stock <= self.reorder_level
    }

    /// Tombstoned products can still be read but never mutated.
    pub fn ensure_active(&self) -> DomainResult<()> {
        if !self.is_active {
            return Err(DomainError::validation(format!(
                "product {} ({}) is inactive",
                self.sku, self.id
            )));
        }
        Ok(())
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_active()?;
        self.is_active = false;
        self.updated_at = now;
        Ok(())
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_product() -> NewProduct {
        NewProduct {
            sku: "  SKU-001 ".to_string(),
            name: "Espresso Beans 1kg".to_string(),
            vendor_id: None,
            base_price: Money::from_minor(2_499),
            unit_cost: Money::from_minor(1_300),
            tax_rate_bps: None,
            reorder_level: 5,
            reorder_quantity: 20,
            opening_quantity: 0,
        }
    }

    #[test]
    fn register_trims_and_starts_with_zero_stock() {
        let product = Product::register(ProductId::new(), &new_product(), Utc::now()).unwrap();
        assert_eq!(product.sku, "SKU-001");
        assert_eq!(product.quantity_in_stock(), 0);
        assert!(product.is_active);
    }

    #[test]
    fn register_rejects_blank_sku() {
        let mut input = new_product();
        input.sku = "   ".to_string();
        let err = Product::register(ProductId::new(), &input, Utc::now()).unwrap_err();
        assert_eq!(err, DomainError::validation("SKU cannot be empty"));
    }

    #[test]
    fn register_rejects_tax_rate_over_one_hundred_percent() {
        let mut input = new_product();
        input.tax_rate_bps = Some(MAX_TAX_RATE_BPS + 1);
        assert!(Product::register(ProductId::new(), &input, Utc::now()).is_err());
    }

    #[test]
    fn needs_reorder_at_threshold() {
        let product = Product::register(ProductId::new(), &new_product(), Utc::now())
            .unwrap()
            .with_stored_quantity(5);
        assert!(product.needs_reorder());
        assert!(!product.clone().with_stored_quantity(6).needs_reorder());
    }

    #[test]
    fn deactivated_products_are_rejected_for_mutation() {
        let mut product = Product::register(ProductId::new(), &new_product(), Utc::now()).unwrap();
        product.deactivate(Utc::now()).unwrap();
        assert!(product.ensure_active().is_err());
        assert!(!product.needs_reorder());
        // Deactivating twice is not a silent no-op.
        assert!(product.deactivate(Utc::now()).is_err());
    }

    #[test]
    fn effective_tax_rate_prefers_override() {
        let mut product = Product::register(ProductId::new(), &new_product(), Utc::now()).unwrap();
        assert_eq!(product.effective_tax_rate_bps(825), 825);
        product.tax_rate_bps = Some(0);
        assert_eq!(product.effective_tax_rate_bps(825), 0);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: any input passing validation registers with the given values.
            #[test]
            fn valid_inputs_register(
                sku in "[A-Z0-9]{1,20}",
                name in "[A-Za-z][A-Za-z0-9 ]{0,40}",
                price in 0i64..1_000_000,
                level in 0i64..1_000,
                qty in 0i64..1_000,
            ) {
                let input = NewProduct {
                    sku: sku.clone(),
                    name,
                    vendor_id: None,
                    base_price: Money::from_minor(price),
                    unit_cost: Money::ZERO,
                    tax_rate_bps: None,
                    reorder_level: level,
                    reorder_quantity: qty,
                    opening_quantity: 0,
                };
                let product = Product::register(ProductId::new(), &input, Utc::now()).unwrap();
                prop_assert_eq!(&product.sku, &sku);
                prop_assert_eq!(product.base_price.minor(), price);
                prop_assert_eq!(product.quantity_in_stock(), 0);
            }
        }
    }
}
