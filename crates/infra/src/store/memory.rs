//! In-memory store.
//!
//! Used by tests and by processes started without a database. Every row has its own
//! async mutex; a unit of work keeps the guards it acquired until it ends, which gives
//! the same serialization as `SELECT ... FOR UPDATE`. Writes are staged in the unit of
//! work and merged into the shared tables in one step on commit.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};

use tillpoint_core::{ProductId, PurchaseOrderId, TransactionId, VendorId};
use tillpoint_inventory::InventoryAdjustment;
use tillpoint_products::Product;
use tillpoint_purchasing::{PurchaseOrder, Vendor};
use tillpoint_sales::Transaction;

use super::{Sequence, Store, StoreTx};
use crate::error::StoreError;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    Product(ProductId),
    Vendor(VendorId),
    Transaction(TransactionId),
    PurchaseOrder(PurchaseOrderId),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Product(id) => write!(f, "product {id}"),
            RowKey::Vendor(id) => write!(f, "vendor {id}"),
            RowKey::Transaction(id) => write!(f, "transaction {id}"),
            RowKey::PurchaseOrder(id) => write!(f, "purchase order {id}"),
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    vendors: HashMap<VendorId, Vendor>,
    transactions: HashMap<TransactionId, Transaction>,
    purchase_orders: HashMap<PurchaseOrderId, PurchaseOrder>,
    adjustments: Vec<InventoryAdjustment>,
}

#[derive(Debug)]
struct Shared {
    tables: RwLock<Tables>,
    row_locks: Mutex<HashMap<RowKey, Arc<RowMutex<()>>>>,
    sequences: [AtomicI64; 3],
    lock_timeout: Duration,
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

fn sequence_slot(sequence: Sequence) -> usize {
    match sequence {
        Sequence::Transaction => 0,
        Sequence::PurchaseOrder => 1,
        Sequence::Adjustment => 2,
    }
}

/// In-memory [`Store`] with per-row locks.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl InMemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                sequences: [AtomicI64::new(0), AtomicI64::new(0), AtomicI64::new(0)],
                lock_timeout,
            }),
        }
    }

    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R, StoreError> {
        let tables = self.shared.tables.read().map_err(poisoned)?;
        Ok(f(&tables))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(InMemoryTx {
            shared: Arc::clone(&self.shared),
            held: HashMap::new(),
            inserted: HashSet::new(),
            staged: Tables::default(),
        })
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        self.read(|t| t.products.get(&id).cloned())
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let mut products = self.read(|t| t.products.values().cloned().collect::<Vec<_>>())?;
        products.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(products)
    }

    async fn get_vendor(&self, id: VendorId) -> Result<Option<Vendor>, StoreError> {
        self.read(|t| t.vendors.get(&id).cloned())
    }

    async fn list_vendors(&self) -> Result<Vec<Vendor>, StoreError> {
        let mut vendors = self.read(|t| t.vendors.values().cloned().collect::<Vec<_>>())?;
        vendors.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(vendors)
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        self.read(|t| t.transactions.get(&id).cloned())
    }

    async fn get_purchase_order(&self, id: PurchaseOrderId) -> Result<Option<PurchaseOrder>, StoreError> {
        self.read(|t| t.purchase_orders.get(&id).cloned())
    }

    async fn adjustments_for_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<InventoryAdjustment>, StoreError> {
        self.read(|t| {
            t.adjustments
                .iter()
                .filter(|a| a.product_id == product_id)
                .cloned()
                .collect()
        })
    }
}

/// Unit of work over an [`InMemoryStore`].
pub struct InMemoryTx {
    shared: Arc<Shared>,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
    /// Rows created by this unit; invisible to others, so they need no lock.
    inserted: HashSet<RowKey>,
    staged: Tables,
}

impl fmt::Debug for InMemoryTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryTx")
            .field("held", &self.held.keys().collect::<Vec<_>>())
            .field("inserted", &self.inserted)
            .finish_non_exhaustive()
    }
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        self.release_locks();
    }
}

impl InMemoryTx {
    /// Release every row lock and forget the ones nobody else is waiting on.
    fn release_locks(&mut self) {
        if self.held.is_empty() {
            return;
        }
        let keys: Vec<RowKey> = self.held.keys().copied().collect();
        self.held.clear();

        let Ok(mut locks) = self.shared.row_locks.lock() else {
            return;
        };
        for key in keys {
            if locks.get(&key).is_some_and(|m| Arc::strong_count(m) == 1) {
                locks.remove(&key);
            }
        }
    }

    async fn acquire(&mut self, key: RowKey) -> Result<(), StoreError> {
        if self.held.contains_key(&key) || self.inserted.contains(&key) {
            return Ok(());
        }
        let mutex = {
            let mut locks = self.shared.row_locks.lock().map_err(poisoned)?;
            Arc::clone(locks.entry(key).or_default())
        };
        let guard = tokio::time::timeout(self.shared.lock_timeout, mutex.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout(format!("{key} after {:?}", self.shared.lock_timeout)))?;
        self.held.insert(key, guard);
        Ok(())
    }

    fn ensure_writable(&self, key: RowKey) -> Result<(), StoreError> {
        if self.held.contains_key(&key) || self.inserted.contains(&key) {
            Ok(())
        } else {
            Err(StoreError::Backend(format!("{key} written without holding its lock")))
        }
    }

    fn committed<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R, StoreError> {
        let tables = self.shared.tables.read().map_err(poisoned)?;
        Ok(f(&tables))
    }

    fn current_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        match self.staged.products.get(&id) {
            Some(p) => Ok(Some(p.clone())),
            None => self.committed(|t| t.products.get(&id).cloned()),
        }
    }

    fn current_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        match self.staged.transactions.get(&id) {
            Some(t) => Ok(Some(t.clone())),
            None => self.committed(|t| t.transactions.get(&id).cloned()),
        }
    }

    fn current_vendor(&self, id: VendorId) -> Result<Option<Vendor>, StoreError> {
        match self.staged.vendors.get(&id) {
            Some(v) => Ok(Some(v.clone())),
            None => self.committed(|t| t.vendors.get(&id).cloned()),
        }
    }

    fn current_purchase_order(&self, id: PurchaseOrderId) -> Result<Option<PurchaseOrder>, StoreError> {
        match self.staged.purchase_orders.get(&id) {
            Some(po) => Ok(Some(po.clone())),
            None => self.committed(|t| t.purchase_orders.get(&id).cloned()),
        }
    }

    fn sku_taken(tables: &Tables, product: &Product) -> bool {
        tables
            .products
            .values()
            .any(|p| p.id != product.id && p.sku == product.sku)
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        self.acquire(RowKey::Product(id)).await?;
        self.current_product(id)
    }

    async fn lock_vendor(&mut self, id: VendorId) -> Result<Option<Vendor>, StoreError> {
        self.acquire(RowKey::Vendor(id)).await?;
        self.current_vendor(id)
    }

    async fn lock_transaction(&mut self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        self.acquire(RowKey::Transaction(id)).await?;
        self.current_transaction(id)
    }

    async fn lock_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        self.acquire(RowKey::PurchaseOrder(id)).await?;
        self.current_purchase_order(id)
    }

    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        let exists = self.current_product(product.id)?.is_some();
        let taken = self.committed(|t| Self::sku_taken(t, product))? || Self::sku_taken(&self.staged, product);
        if exists {
            return Err(StoreError::UniqueViolation(format!("product id {}", product.id)));
        }
        if taken {
            return Err(StoreError::UniqueViolation(format!("sku {}", product.sku)));
        }
        self.inserted.insert(RowKey::Product(product.id));
        self.staged.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn update_product(&mut self, product: &Product) -> Result<(), StoreError> {
        self.ensure_writable(RowKey::Product(product.id))?;
        let stored = self
            .current_product(product.id)?
            .ok_or_else(|| StoreError::Backend(format!("product {} does not exist", product.id)))?;
        let updated = product.clone().with_stored_quantity(stored.quantity_in_stock());
        self.staged.products.insert(product.id, updated);
        Ok(())
    }

    async fn write_stock(&mut self, id: ProductId, quantity_in_stock: i64) -> Result<(), StoreError> {
        self.ensure_writable(RowKey::Product(id))?;
        if quantity_in_stock < 0 {
            return Err(StoreError::Backend(format!(
                "product {id}: stock cannot be written negative ({quantity_in_stock})"
            )));
        }
        let stored = self
            .current_product(id)?
            .ok_or_else(|| StoreError::Backend(format!("product {id} does not exist")))?;
        self.staged
            .products
            .insert(id, stored.with_stored_quantity(quantity_in_stock));
        Ok(())
    }

    async fn insert_adjustment(&mut self, adjustment: &InventoryAdjustment) -> Result<(), StoreError> {
        self.ensure_writable(RowKey::Product(adjustment.product_id))?;
        self.staged.adjustments.push(adjustment.clone());
        Ok(())
    }

    async fn insert_vendor(&mut self, vendor: &Vendor) -> Result<(), StoreError> {
        if self.current_vendor(vendor.id)?.is_some() {
            return Err(StoreError::UniqueViolation(format!("vendor id {}", vendor.id)));
        }
        self.inserted.insert(RowKey::Vendor(vendor.id));
        self.staged.vendors.insert(vendor.id, vendor.clone());
        Ok(())
    }

    async fn update_vendor(&mut self, vendor: &Vendor) -> Result<(), StoreError> {
        self.ensure_writable(RowKey::Vendor(vendor.id))?;
        self.staged.vendors.insert(vendor.id, vendor.clone());
        Ok(())
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        if self.current_transaction(transaction.id)?.is_some() {
            return Err(StoreError::UniqueViolation(format!("transaction id {}", transaction.id)));
        }
        self.inserted.insert(RowKey::Transaction(transaction.id));
        self.staged
            .transactions
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        self.ensure_writable(RowKey::Transaction(transaction.id))?;
        let mut stored = self
            .current_transaction(transaction.id)?
            .ok_or_else(|| StoreError::Backend(format!("transaction {} does not exist", transaction.id)))?;
        stored.status = transaction.status;
        stored.voided_at = transaction.voided_at;
        stored.voided_by = transaction.voided_by;
        stored.void_reason = transaction.void_reason.clone();
        self.staged.transactions.insert(stored.id, stored);
        Ok(())
    }

    async fn insert_purchase_order(&mut self, order: &PurchaseOrder) -> Result<(), StoreError> {
        if self.current_purchase_order(order.id)?.is_some() {
            return Err(StoreError::UniqueViolation(format!("purchase order id {}", order.id)));
        }
        self.inserted.insert(RowKey::PurchaseOrder(order.id));
        self.staged.purchase_orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn update_purchase_order(&mut self, order: &PurchaseOrder) -> Result<(), StoreError> {
        self.ensure_writable(RowKey::PurchaseOrder(order.id))?;
        self.staged.purchase_orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn next_number(&mut self, sequence: Sequence) -> Result<i64, StoreError> {
        Ok(self.shared.sequences[sequence_slot(sequence)].fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        let staged = std::mem::take(&mut self.staged);
        {
            let mut tables = self.shared.tables.write().map_err(poisoned)?;

            for key in &self.inserted {
                if let RowKey::Product(id) = key {
                    if let Some(product) = staged.products.get(id) {
                        if Self::sku_taken(&tables, product) {
                            return Err(StoreError::UniqueViolation(format!("sku {}", product.sku)));
                        }
                    }
                }
            }

            tables.products.extend(staged.products);
            tables.vendors.extend(staged.vendors);
            tables.transactions.extend(staged.transactions);
            tables.purchase_orders.extend(staged.purchase_orders);
            tables.adjustments.extend(staged.adjustments);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        drop(self);
        Ok(())
    }
}
