//! Purchase order workflow.
//!
//! ```text
//! draft --submit--> submitted --approve--> approved --receive--> partially_received --receive--> received --close--> closed
//! {draft, submitted, approved, partially_received} --cancel--> cancelled
//! ```
//!
//! Cancelling keeps any stock already received.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use tillpoint_core::{DomainError, ProductId, PurchaseOrderId, UserId, VendorId};
use tillpoint_inventory::{AdjustmentRequest, AdjustmentType};
use tillpoint_purchasing::{
    CreatePurchaseOrder, PoDraftEdit, PurchaseOrder, ReceiptLine, build_reorder_suggestions,
    format_po_number,
};

use super::lock_products_in_order;
use crate::error::ServiceResult;
use crate::ledger;
use crate::store::{Sequence, Store, StoreTx};

const SUGGESTED_PO_NOTE: &str = "created from reorder suggestions";

pub struct PurchasingService<S> {
    store: Arc<S>,
}

impl<S> Clone for PurchasingService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> PurchasingService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn ensure_vendor_usable(&self, tx: &mut S::Tx, vendor_id: VendorId) -> ServiceResult<()> {
        tx.lock_vendor(vendor_id)
            .await?
            .ok_or_else(|| DomainError::not_found("vendor", vendor_id))?
            .ensure_active()?;
        Ok(())
    }

    async fn ensure_product_orderable(&self, product_id: ProductId) -> ServiceResult<()> {
        self.store
            .get_product(product_id)
            .await?
            .ok_or_else(|| DomainError::not_found("product", product_id))?
            .ensure_active()?;
        Ok(())
    }

    async fn lock_order(&self, tx: &mut S::Tx, po_id: PurchaseOrderId) -> ServiceResult<PurchaseOrder> {
        Ok(tx
            .lock_purchase_order(po_id)
            .await?
            .ok_or_else(|| DomainError::not_found("purchase order", po_id))?)
    }

    /// Lock, apply `transition`, persist, commit.
    async fn transition<F>(&self, po_id: PurchaseOrderId, transition: F) -> ServiceResult<PurchaseOrder>
    where
        F: FnOnce(&mut PurchaseOrder, DateTime<Utc>) -> Result<(), DomainError> + Send,
    {
        let mut tx = self.store.begin().await?;
        let mut order = self.lock_order(&mut tx, po_id).await?;
        transition(&mut order, Utc::now())?;
        tx.update_purchase_order(&order).await?;
        tx.commit().await?;
        Ok(order)
    }

    /// Create a draft purchase order.
    #[instrument(
        skip(self, request),
        fields(vendor_id = %request.vendor_id, lines = request.lines.len(), actor_id = %actor_id),
        err(level = "warn")
    )]
    pub async fn create_po(&self, request: &CreatePurchaseOrder, actor_id: UserId) -> ServiceResult<PurchaseOrder> {
        for line in &request.lines {
            self.ensure_product_orderable(line.product_id).await?;
        }

        let mut tx = self.store.begin().await?;
        self.ensure_vendor_usable(&mut tx, request.vendor_id).await?;

        let now = Utc::now();
        let number = format_po_number(now.date_naive(), tx.next_number(Sequence::PurchaseOrder).await?);
        let order = PurchaseOrder::draft(PurchaseOrderId::new(), number, request, actor_id, now)?;
        tx.insert_purchase_order(&order).await?;
        tx.commit().await?;

        info!(number = %order.number, total = %order.total_amount, "purchase order drafted");
        Ok(order)
    }

    /// Apply draft edits in order. Any failing edit rejects all of them.
    #[instrument(skip(self, edits), fields(po_id = %po_id, edits = edits.len(), actor_id = %actor_id), err(level = "warn"))]
    pub async fn update_po(
        &self,
        po_id: PurchaseOrderId,
        edits: &[PoDraftEdit],
        actor_id: UserId,
    ) -> ServiceResult<PurchaseOrder> {
        for edit in edits {
            if let PoDraftEdit::AddLine(line) = edit {
                self.ensure_product_orderable(line.product_id).await?;
            }
        }

        let mut tx = self.store.begin().await?;
        let mut order = self.lock_order(&mut tx, po_id).await?;
        let now = Utc::now();
        for edit in edits {
            if let PoDraftEdit::SetVendor { vendor_id } = edit {
                self.ensure_vendor_usable(&mut tx, *vendor_id).await?;
            }
            order.apply_edit(edit, now)?;
        }
        tx.update_purchase_order(&order).await?;
        tx.commit().await?;

        info!(number = %order.number, total = %order.total_amount, "purchase order updated");
        Ok(order)
    }

    #[instrument(skip(self), fields(po_id = %po_id, actor_id = %actor_id), err(level = "warn"))]
    pub async fn submit_po(&self, po_id: PurchaseOrderId, actor_id: UserId) -> ServiceResult<PurchaseOrder> {
        let order = self.transition(po_id, |po, now| po.submit(now)).await?;
        info!(number = %order.number, "purchase order submitted");
        Ok(order)
    }

    #[instrument(skip(self), fields(po_id = %po_id, approver_id = %approver_id), err(level = "warn"))]
    pub async fn approve_po(&self, po_id: PurchaseOrderId, approver_id: UserId) -> ServiceResult<PurchaseOrder> {
        let order = self
            .transition(po_id, |po, now| po.approve(approver_id, now))
            .await?;
        info!(number = %order.number, "purchase order approved");
        Ok(order)
    }

    /// Credit a shipment to stock. Over-receipt on any line rejects the whole call.
    #[instrument(
        skip(self, receipts, notes),
        fields(po_id = %po_id, receipts = receipts.len(), actor_id = %actor_id),
        err(level = "warn")
    )]
    pub async fn receive_items(
        &self,
        po_id: PurchaseOrderId,
        receipts: &[ReceiptLine],
        notes: Option<&str>,
        actor_id: UserId,
    ) -> ServiceResult<PurchaseOrder> {
        let mut tx = self.store.begin().await?;
        let mut order = self.lock_order(&mut tx, po_id).await?;
        let planned = order.plan_receipt(receipts)?;

        lock_products_in_order(&mut tx, planned.iter().map(|p| p.product_id)).await?;

        let reason = notes.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string);
        for receipt in &planned {
            ledger::adjust(
                &mut tx,
                &AdjustmentRequest {
                    product_id: receipt.product_id,
                    delta: receipt.quantity,
                    adjustment_type: AdjustmentType::PoReceive,
                    reason: reason.clone(),
                    reference: Some(order.number.clone()),
                    actor_id,
                },
            )
            .await?;
        }

        order.apply_receipt(&planned, Utc::now())?;
        tx.update_purchase_order(&order).await?;
        tx.commit().await?;

        info!(number = %order.number, status = %order.status, "items received");
        Ok(order)
    }

    #[instrument(skip(self), fields(po_id = %po_id, actor_id = %actor_id), err(level = "warn"))]
    pub async fn close_po(&self, po_id: PurchaseOrderId, actor_id: UserId) -> ServiceResult<PurchaseOrder> {
        let order = self.transition(po_id, |po, now| po.close(now)).await?;
        info!(number = %order.number, "purchase order closed");
        Ok(order)
    }

    /// Cancel the order. Stock from earlier partial receipts stays on hand.
    #[instrument(skip(self, reason), fields(po_id = %po_id, actor_id = %actor_id), err(level = "warn"))]
    pub async fn cancel_po(
        &self,
        po_id: PurchaseOrderId,
        reason: &str,
        actor_id: UserId,
    ) -> ServiceResult<PurchaseOrder> {
        if reason.trim().is_empty() {
            return Err(DomainError::validation("cancel reason cannot be empty").into());
        }
        let order = self.transition(po_id, |po, now| po.cancel(reason, now)).await?;
        info!(number = %order.number, "purchase order cancelled");
        Ok(order)
    }

    #[instrument(skip(self), err(level = "warn"))]
    pub async fn get_purchase_order(&self, po_id: PurchaseOrderId) -> ServiceResult<PurchaseOrder> {
        self.store
            .get_purchase_order(po_id)
            .await?
            .ok_or_else(|| DomainError::not_found("purchase order", po_id).into())
    }

    /// Draft a purchase order from the current reorder suggestions for one vendor.
    #[instrument(skip(self), fields(vendor_id = %vendor_id, actor_id = %actor_id), err(level = "warn"))]
    pub async fn create_po_from_suggestions(
        &self,
        vendor_id: VendorId,
        actor_id: UserId,
    ) -> ServiceResult<PurchaseOrder> {
        let products = self.store.list_products().await?;
        let vendors = self.store.list_vendors().await?;
        let suggestion = build_reorder_suggestions(&products, &vendors)?
            .into_iter()
            .find(|s| s.vendor_id == Some(vendor_id))
            .ok_or_else(|| {
                DomainError::validation(format!("no reorder suggestions for vendor {vendor_id}"))
            })?;

        let request = suggestion.to_purchase_order_request(Some(SUGGESTED_PO_NOTE.to_string()))?;
        self.create_po(&request, actor_id).await
    }
}
