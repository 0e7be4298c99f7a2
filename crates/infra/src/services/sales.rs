//! Sales transaction processor.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use tillpoint_core::{DomainError, TransactionId, UserId};
use tillpoint_inventory::{AdjustmentRequest, AdjustmentType};
use tillpoint_sales::{CreateTransaction, Transaction, format_transaction_number, price_sale};

use super::lock_products_in_order;
use crate::error::ServiceResult;
use crate::ledger;
use crate::store::{Sequence, Store, StoreTx};

/// `(none) → completed → voided`.
pub struct SalesService<S> {
    store: Arc<S>,
    default_tax_rate_bps: u32,
}

impl<S> Clone for SalesService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            default_tax_rate_bps: self.default_tax_rate_bps,
        }
    }
}

impl<S: Store> SalesService<S> {
    pub fn new(store: Arc<S>, default_tax_rate_bps: u32) -> Self {
        Self {
            store,
            default_tax_rate_bps,
        }
    }

    /// Price, take payment, and deduct stock for every line, all or nothing.
    #[instrument(
        skip(self, request),
        fields(cashier_id = %cashier_id, items = request.items.len()),
        err(level = "warn")
    )]
    pub async fn create_transaction(
        &self,
        request: &CreateTransaction,
        cashier_id: UserId,
    ) -> ServiceResult<Transaction> {
        request.validate()?;
        let tendered = request.amount_tendered()?;

        let mut tx = self.store.begin().await?;
        let products = lock_products_in_order(&mut tx, request.product_ids()).await?;

        let priced = price_sale(request, &products, self.default_tax_rate_bps)?;
        priced.ensure_covered_by(tendered)?;

        let number = format_transaction_number(tx.next_number(Sequence::Transaction).await?);

        for line in &request.items {
            ledger::adjust(
                &mut tx,
                &AdjustmentRequest {
                    product_id: line.product_id,
                    delta: -line.quantity,
                    adjustment_type: AdjustmentType::Sale,
                    reason: None,
                    reference: Some(number.clone()),
                    actor_id: cashier_id,
                },
            )
            .await?;
        }

        let transaction = Transaction::complete(
            TransactionId::new(),
            number,
            priced,
            &request.payments,
            cashier_id,
            request.notes.clone(),
            Utc::now(),
        )?;
        tx.insert_transaction(&transaction).await?;
        tx.commit().await?;

        info!(
            number = %transaction.number,
            total = %transaction.total_amount,
            change_due = %transaction.change_due,
            "transaction completed"
        );
        Ok(transaction)
    }

    /// Restore every sold quantity and mark the transaction voided. Irreversible.
    #[instrument(skip(self, reason), fields(transaction_id = %transaction_id, actor_id = %actor_id), err(level = "warn"))]
    pub async fn void_transaction(
        &self,
        transaction_id: TransactionId,
        reason: &str,
        actor_id: UserId,
    ) -> ServiceResult<Transaction> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("void reason cannot be empty").into());
        }

        let mut tx = self.store.begin().await?;
        let mut transaction = tx
            .lock_transaction(transaction_id)
            .await?
            .ok_or_else(|| DomainError::not_found("transaction", transaction_id))?;
        transaction.ensure_voidable()?;

        lock_products_in_order(&mut tx, transaction.sold_quantities().map(|(id, _)| id)).await?;

        let restores: Vec<_> = transaction.sold_quantities().collect();
        for (product_id, quantity) in restores {
            ledger::adjust(
                &mut tx,
                &AdjustmentRequest {
                    product_id,
                    delta: quantity,
                    adjustment_type: AdjustmentType::SaleVoid,
                    reason: Some(reason.to_string()),
                    reference: Some(transaction.number.clone()),
                    actor_id,
                },
            )
            .await?;
        }

        transaction.void(reason, actor_id, Utc::now())?;
        tx.update_transaction(&transaction).await?;
        tx.commit().await?;

        info!(number = %transaction.number, "transaction voided");
        Ok(transaction)
    }

    #[instrument(skip(self), err(level = "warn"))]
    pub async fn get_transaction(&self, transaction_id: TransactionId) -> ServiceResult<Transaction> {
        self.store
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| DomainError::not_found("transaction", transaction_id).into())
    }
}
