//! Engine operations.
//!
//! Every public operation runs in exactly one unit of work: it begins a `StoreTx`,
//! validates and prices before touching stock, calls the ledger for every stock
//! movement, and commits. Any error drops the unit of work, which rolls it back.
//!
//! Lock order is fixed across services: the document row (transaction or purchase
//! order) first, then product rows in ascending id order.

pub mod adjustments;
pub mod catalog;
pub mod purchasing;
pub mod reorder;
pub mod sales;

pub use adjustments::{AdjustmentService, NewAdjustment};
pub use catalog::CatalogService;
pub use purchasing::PurchasingService;
pub use reorder::ReorderService;
pub use sales::SalesService;

use std::collections::BTreeMap;

use tillpoint_core::{DomainError, ProductId};
use tillpoint_products::Product;

use crate::error::ServiceResult;
use crate::store::StoreTx;

/// Lock `ids` in ascending order and return the rows. Unknown ids are `NotFound`.
pub(crate) async fn lock_products_in_order<T>(
    tx: &mut T,
    ids: impl IntoIterator<Item = ProductId>,
) -> ServiceResult<BTreeMap<ProductId, Product>>
where
    T: StoreTx + ?Sized,
{
    let mut ordered: Vec<ProductId> = ids.into_iter().collect();
    ordered.sort();
    ordered.dedup();

    let mut products = BTreeMap::new();
    for id in ordered {
        let product = tx
            .lock_product(id)
            .await?
            .ok_or_else(|| DomainError::not_found("product", id))?;
        products.insert(id, product);
    }
    Ok(products)
}

#[cfg(test)]
pub(crate) mod testkit {
    use std::sync::Arc;
    use std::time::Duration;

    use tillpoint_core::{Money, UserId, VendorId};
    use tillpoint_products::{NewProduct, Product};
    use tillpoint_purchasing::{NewVendor, Vendor};
    use tracing_subscriber::EnvFilter;

    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::store::InMemoryStore;

    pub fn engine() -> Engine<InMemoryStore> {
        engine_with(EngineConfig {
            lock_timeout: Duration::from_secs(2),
            ..EngineConfig::default()
        })
    }

    /// Also routes engine logs to the test harness; set `RUST_LOG` to see them.
    pub fn engine_with(config: EngineConfig) -> Engine<InMemoryStore> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        Engine::in_memory(&config)
    }

    pub fn shared_engine() -> Arc<Engine<InMemoryStore>> {
        Arc::new(engine())
    }

    pub fn actor() -> UserId {
        UserId::new()
    }

    pub fn new_product(sku: &str, price: i64, opening: i64) -> NewProduct {
        NewProduct {
            sku: sku.to_string(),
            name: format!("{sku} item"),
            vendor_id: None,
            base_price: Money::from_minor(price),
            unit_cost: Money::from_minor(price / 2),
            tax_rate_bps: None,
            reorder_level: 5,
            reorder_quantity: 20,
            opening_quantity: opening,
        }
    }

    pub async fn product(engine: &Engine<InMemoryStore>, sku: &str, price: i64, opening: i64) -> Product {
        engine
            .catalog
            .register_product(&new_product(sku, price, opening), actor())
            .await
            .unwrap()
    }

    pub async fn vendor(engine: &Engine<InMemoryStore>, name: &str) -> Vendor {
        engine
            .catalog
            .register_vendor(
                &NewVendor {
                    name: name.to_string(),
                    contact_email: None,
                },
                actor(),
            )
            .await
            .unwrap()
    }

    pub async fn product_for_vendor(
        engine: &Engine<InMemoryStore>,
        sku: &str,
        vendor_id: VendorId,
        opening: i64,
    ) -> Product {
        let mut input = new_product(sku, 1_000, opening);
        input.vendor_id = Some(vendor_id);
        engine.catalog.register_product(&input, actor()).await.unwrap()
    }

    pub async fn stock(engine: &Engine<InMemoryStore>, product: &Product) -> i64 {
        engine
            .catalog
            .get_product(product.id)
            .await
            .unwrap()
            .quantity_in_stock()
    }
}
