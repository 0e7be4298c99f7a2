//! Manual stock adjustments (damage, theft, found, correction).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use tillpoint_core::{DomainError, ProductId, UserId};
use tillpoint_inventory::{AdjustmentRequest, AdjustmentType, InventoryAdjustment};

use crate::error::ServiceResult;
use crate::ledger;
use crate::store::{Store, StoreTx};

/// Request: record a manual adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAdjustment {
    pub product_id: ProductId,
    pub adjustment_type: AdjustmentType,
    /// Signed change; must agree with the type's direction.
    pub quantity_change: i64,
    pub reason: Option<String>,
}

pub struct AdjustmentService<S> {
    store: Arc<S>,
}

impl<S> Clone for AdjustmentService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> AdjustmentService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Thin pass-through to the ledger. System types (sale, sale_void, po_receive,
    /// initial) are written by their own operations and are rejected here.
    #[instrument(
        skip(self, input),
        fields(
            product_id = %input.product_id,
            adjustment_type = %input.adjustment_type,
            quantity_change = input.quantity_change,
            actor_id = %actor_id
        ),
        err(level = "warn")
    )]
    pub async fn create_adjustment(
        &self,
        input: &NewAdjustment,
        actor_id: UserId,
    ) -> ServiceResult<InventoryAdjustment> {
        if !input.adjustment_type.is_manual() {
            return Err(DomainError::validation(format!(
                "{} adjustments cannot be recorded manually",
                input.adjustment_type
            ))
            .into());
        }
        let request = AdjustmentRequest {
            product_id: input.product_id,
            delta: input.quantity_change,
            adjustment_type: input.adjustment_type,
            reason: input.reason.clone(),
            reference: None,
            actor_id,
        };
        request.validate()?;

        let mut tx = self.store.begin().await?;
        let adjustment = ledger::adjust(&mut tx, &request).await?;
        tx.commit().await?;

        info!(number = %adjustment.number, quantity_after = adjustment.quantity_after, "adjustment recorded");
        Ok(adjustment)
    }

    /// Audit trail for a product in append order.
    #[instrument(skip(self), err(level = "warn"))]
    pub async fn adjustment_history(&self, product_id: ProductId) -> ServiceResult<Vec<InventoryAdjustment>> {
        if self.store.get_product(product_id).await?.is_none() {
            return Err(DomainError::not_found("product", product_id).into());
        }
        Ok(self.store.adjustments_for_product(product_id).await?)
    }
}
