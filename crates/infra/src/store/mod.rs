//! Storage boundary.
//!
//! A [`Store`] serves committed reads and opens units of work. A [`StoreTx`] is one
//! unit of work: rows read through its `lock_*` methods stay locked until the unit
//! commits or is dropped, and nothing it writes is visible to anyone else before
//! [`StoreTx::commit`]. Dropping a `StoreTx` without committing rolls it back.
//!
//! Stock quantity has its own write path ([`StoreTx::write_stock`]) so that catalog
//! updates can never move it; the inventory ledger is its only caller.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use tillpoint_core::{ProductId, PurchaseOrderId, TransactionId, VendorId};
use tillpoint_inventory::InventoryAdjustment;
use tillpoint_products::Product;
use tillpoint_purchasing::{PurchaseOrder, Vendor};
use tillpoint_sales::Transaction;

use crate::error::StoreError;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Source of human-facing entity numbers.
///
/// Sequences are not transactional: a number drawn by a unit of work that later
/// rolls back is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sequence {
    Transaction,
    PurchaseOrder,
    Adjustment,
}

impl Sequence {
    /// Name of the backing database sequence.
    pub fn name(self) -> &'static str {
        match self {
            Sequence::Transaction => "transaction_number_seq",
            Sequence::PurchaseOrder => "purchase_order_number_seq",
            Sequence::Adjustment => "adjustment_number_seq",
        }
    }
}

/// Committed-state reads and unit-of-work factory.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: StoreTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    async fn list_products(&self) -> Result<Vec<Product>, StoreError>;

    async fn get_vendor(&self, id: VendorId) -> Result<Option<Vendor>, StoreError>;

    async fn list_vendors(&self) -> Result<Vec<Vendor>, StoreError>;

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError>;

    async fn get_purchase_order(&self, id: PurchaseOrderId) -> Result<Option<PurchaseOrder>, StoreError>;

    /// Audit trail for one product, oldest first.
    async fn adjustments_for_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<InventoryAdjustment>, StoreError>;
}

/// One unit of work.
#[async_trait]
pub trait StoreTx: Send {
    /// Lock a product row and read it, including this unit's own staged changes.
    async fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;

    async fn lock_vendor(&mut self, id: VendorId) -> Result<Option<Vendor>, StoreError>;

    async fn lock_transaction(&mut self, id: TransactionId) -> Result<Option<Transaction>, StoreError>;

    async fn lock_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError>;

    /// Insert a new product. Fails with `UniqueViolation` when the SKU is taken.
    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError>;

    /// Persist catalog fields. The stored stock quantity is left untouched.
    async fn update_product(&mut self, product: &Product) -> Result<(), StoreError>;

    /// Overwrite a locked product's stock quantity.
    async fn write_stock(&mut self, id: ProductId, quantity_in_stock: i64) -> Result<(), StoreError>;

    async fn insert_adjustment(&mut self, adjustment: &InventoryAdjustment) -> Result<(), StoreError>;

    async fn insert_vendor(&mut self, vendor: &Vendor) -> Result<(), StoreError>;

    async fn update_vendor(&mut self, vendor: &Vendor) -> Result<(), StoreError>;

    /// Insert a transaction together with its items and payments.
    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError>;

    /// Persist status and void fields. Items and payments are immutable.
    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError>;

    async fn insert_purchase_order(&mut self, order: &PurchaseOrder) -> Result<(), StoreError>;

    /// Persist header fields and reconcile the line set with `order.lines`.
    async fn update_purchase_order(&mut self, order: &PurchaseOrder) -> Result<(), StoreError>;

    async fn next_number(&mut self, sequence: Sequence) -> Result<i64, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
