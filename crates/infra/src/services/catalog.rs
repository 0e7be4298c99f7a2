//! Product and vendor registration.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use tillpoint_core::{DomainError, ProductId, UserId, VendorId};
use tillpoint_inventory::{AdjustmentRequest, AdjustmentType};
use tillpoint_products::{NewProduct, Product};
use tillpoint_purchasing::{NewVendor, Vendor};

use crate::error::{ServiceError, ServiceResult, StoreError};
use crate::ledger;
use crate::store::{Store, StoreTx};

pub struct CatalogService<S> {
    store: Arc<S>,
}

impl<S> Clone for CatalogService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

fn sku_conflict(sku: &str) -> impl FnOnce(StoreError) -> ServiceError + '_ {
    move |err| match err {
        StoreError::UniqueViolation(_) => {
            DomainError::validation(format!("sku {sku} already exists")).into()
        }
        other => other.into(),
    }
}

impl<S: Store> CatalogService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Register a product. Opening stock goes through the ledger as an `initial` movement.
    #[instrument(skip(self, input), fields(sku = %input.sku, actor_id = %actor_id), err(level = "warn"))]
    pub async fn register_product(&self, input: &NewProduct, actor_id: UserId) -> ServiceResult<Product> {
        input.validate()?;

        let mut tx = self.store.begin().await?;
        if let Some(vendor_id) = input.vendor_id {
            tx.lock_vendor(vendor_id)
                .await?
                .ok_or_else(|| DomainError::not_found("vendor", vendor_id))?
                .ensure_active()?;
        }

        let product = Product::register(ProductId::new(), input, Utc::now())?;
        tx.insert_product(&product).await.map_err(sku_conflict(&product.sku))?;

        if input.opening_quantity > 0 {
            ledger::adjust(
                &mut tx,
                &AdjustmentRequest {
                    product_id: product.id,
                    delta: input.opening_quantity,
                    adjustment_type: AdjustmentType::Initial,
                    reason: Some("opening stock".to_string()),
                    reference: None,
                    actor_id,
                },
            )
            .await?;
        }

        let stored = tx
            .lock_product(product.id)
            .await?
            .ok_or_else(|| DomainError::not_found("product", product.id))?;
        tx.commit().await.map_err(sku_conflict(&product.sku))?;

        info!(product_id = %stored.id, quantity = stored.quantity_in_stock(), "product registered");
        Ok(stored)
    }

    /// Tombstone a product. It stays readable; every mutation of it is rejected afterwards.
    #[instrument(skip(self), fields(product_id = %product_id, actor_id = %actor_id), err(level = "warn"))]
    pub async fn deactivate_product(&self, product_id: ProductId, actor_id: UserId) -> ServiceResult<Product> {
        let mut tx = self.store.begin().await?;
        let mut product = tx
            .lock_product(product_id)
            .await?
            .ok_or_else(|| DomainError::not_found("product", product_id))?;
        product.deactivate(Utc::now())?;
        tx.update_product(&product).await?;
        tx.commit().await?;

        info!(sku = %product.sku, "product deactivated");
        Ok(product)
    }

    #[instrument(skip(self), err(level = "warn"))]
    pub async fn get_product(&self, product_id: ProductId) -> ServiceResult<Product> {
        self.store
            .get_product(product_id)
            .await?
            .ok_or_else(|| DomainError::not_found("product", product_id).into())
    }

    #[instrument(skip(self, input), fields(name = %input.name, actor_id = %actor_id), err(level = "warn"))]
    pub async fn register_vendor(&self, input: &NewVendor, actor_id: UserId) -> ServiceResult<Vendor> {
        let vendor = Vendor::register(VendorId::new(), input, Utc::now())?;

        let mut tx = self.store.begin().await?;
        tx.insert_vendor(&vendor).await?;
        tx.commit().await?;

        info!(vendor_id = %vendor.id, "vendor registered");
        Ok(vendor)
    }

    #[instrument(skip(self), fields(vendor_id = %vendor_id, actor_id = %actor_id), err(level = "warn"))]
    pub async fn deactivate_vendor(&self, vendor_id: VendorId, actor_id: UserId) -> ServiceResult<Vendor> {
        let mut tx = self.store.begin().await?;
        let mut vendor = tx
            .lock_vendor(vendor_id)
            .await?
            .ok_or_else(|| DomainError::not_found("vendor", vendor_id))?;
        vendor.deactivate()?;
        tx.update_vendor(&vendor).await?;
        tx.commit().await?;

        info!(name = %vendor.name, "vendor deactivated");
        Ok(vendor)
    }

    #[instrument(skip(self), err(level = "warn"))]
    pub async fn get_vendor(&self, vendor_id: VendorId) -> ServiceResult<Vendor> {
        self.store
            .get_vendor(vendor_id)
            .await?
            .ok_or_else(|| DomainError::not_found("vendor", vendor_id).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testkit::{actor, engine, new_product, product, vendor};
    use tillpoint_core::ErrorKind;

    #[tokio::test]
    async fn opening_stock_is_recorded_as_initial_adjustment() {
        let engine = engine();
        let p = product(&engine, "A-1", 100, 12).await;
        assert_eq!(p.quantity_in_stock(), 12);

        let history = engine.adjustments.adjustment_history(p.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].adjustment_type, AdjustmentType::Initial);
        assert_eq!((history[0].quantity_before, history[0].quantity_after), (0, 12));
    }

    #[tokio::test]
    async fn zero_opening_stock_writes_no_adjustment() {
        let engine = engine();
        let p = product(&engine, "A-1", 100, 0).await;
        assert_eq!(p.quantity_in_stock(), 0);
        assert!(engine.adjustments.adjustment_history(p.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_sku_is_a_validation_error() {
        let engine = engine();
        product(&engine, "A-1", 100, 0).await;
        let err = engine
            .catalog
            .register_product(&new_product("A-1", 200, 5), actor())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Validation));
    }

    #[tokio::test]
    async fn vendor_must_exist_and_be_active() {
        let engine = engine();
        let mut input = new_product("A-1", 100, 0);
        input.vendor_id = Some(VendorId::new());
        let err = engine.catalog.register_product(&input, actor()).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotFound));

        let v = vendor(&engine, "Acme").await;
        engine.catalog.deactivate_vendor(v.id, actor()).await.unwrap();
        input.vendor_id = Some(v.id);
        let err = engine.catalog.register_product(&input, actor()).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Validation));
    }

    #[tokio::test]
    async fn deactivation_is_a_one_way_tombstone() {
        let engine = engine();
        let p = product(&engine, "A-1", 100, 3).await;

        let deactivated = engine.catalog.deactivate_product(p.id, actor()).await.unwrap();
        assert!(!deactivated.is_active);
        assert_eq!(deactivated.quantity_in_stock(), 3);

        let err = engine.catalog.deactivate_product(p.id, actor()).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Validation));
        assert!(!engine.catalog.get_product(p.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let engine = engine();
        let err = engine.catalog.get_product(ProductId::new()).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotFound));
        let err = engine.catalog.get_vendor(VendorId::new()).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotFound));
        let err = engine
            .catalog
            .deactivate_vendor(VendorId::new(), actor())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotFound));
    }
}
