//! Inventory ledger: the only path that changes `quantity_in_stock`.
//!
//! An adjustment locks the product row, decides the movement with
//! [`plan_movement`], writes the new quantity and appends exactly one audit row,
//! all inside the caller's unit of work. A rejected movement writes nothing.

use chrono::Utc;
use tracing::{debug, instrument};

use tillpoint_core::{AdjustmentId, DomainError};
use tillpoint_inventory::{AdjustmentRequest, InventoryAdjustment, format_adjustment_number, plan_movement};

use crate::error::ServiceResult;
use crate::store::{Sequence, StoreTx};

/// Apply one stock movement inside `tx`.
///
/// Returns the audit row, which carries the quantities before and after.
#[instrument(
    skip(tx, request),
    fields(
        product_id = %request.product_id,
        delta = request.delta,
        adjustment_type = %request.adjustment_type
    ),
    err
)]
pub async fn adjust<T>(tx: &mut T, request: &AdjustmentRequest) -> ServiceResult<InventoryAdjustment>
where
    T: StoreTx + ?Sized,
{
    let product = tx
        .lock_product(request.product_id)
        .await?
        .ok_or_else(|| DomainError::not_found("product", request.product_id))?;

    let movement = plan_movement(&product, request)?;

    let number = format_adjustment_number(tx.next_number(Sequence::Adjustment).await?);
    let adjustment = InventoryAdjustment::record(AdjustmentId::new(), number, request, &movement, Utc::now());

    tx.write_stock(movement.product_id, movement.quantity_after).await?;
    tx.insert_adjustment(&adjustment).await?;

    debug!(
        number = %adjustment.number,
        quantity_before = movement.quantity_before,
        quantity_after = movement.quantity_after,
        "stock moved"
    );
    Ok(adjustment)
}
