//! Postgres-backed store.
//!
//! Each [`PgTx`] is one database transaction. Locking reads use `SELECT ... FOR UPDATE`
//! and the wait is bounded by `SET LOCAL lock_timeout`. Entity numbers come from
//! dedicated sequences.
//!
//! ## Error mapping
//!
//! | SQLSTATE | Meaning | `StoreError` |
//! |---|---|---|
//! | `55P03` | lock not available | `LockTimeout` |
//! | `40P01` | deadlock detected | `Deadlock` |
//! | `23505` | unique violation | `UniqueViolation` |
//! | other | | `Backend` |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use tillpoint_core::{
    AdjustmentId, Money, PaymentId, PoLineItemId, ProductId, PurchaseOrderId, TransactionId,
    TransactionItemId, UserId, VendorId,
};
use tillpoint_inventory::InventoryAdjustment;
use tillpoint_products::{NewProduct, Product};
use tillpoint_purchasing::{PoCharges, PoLineItem, PurchaseOrder, Vendor};
use tillpoint_sales::{Payment, Transaction, TransactionItem};

use super::{Sequence, Store, StoreTx};
use crate::config::EngineConfig;
use crate::error::StoreError;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Postgres [`Store`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Open a pool sized and timed from `config`.
    pub async fn connect(config: &EngineConfig) -> Result<Self, StoreError> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::Backend("no database url configured".to_string()))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, config.lock_timeout))
    }

    /// Create tables and sequences if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn conn(&self) -> Result<sqlx::pool::PoolConnection<Postgres>, StoreError> {
        self.pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))
    }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;
        Ok(PgTx { tx })
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let mut conn = self.conn().await?;
        fetch_product(&mut conn, id, false).await
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(&format!("{PRODUCT_SELECT} ORDER BY sku"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_products", e))?;
        rows.iter().map(decode_product).collect()
    }

    async fn get_vendor(&self, id: VendorId) -> Result<Option<Vendor>, StoreError> {
        let mut conn = self.conn().await?;
        fetch_vendor(&mut conn, id, false).await
    }

    async fn list_vendors(&self) -> Result<Vec<Vendor>, StoreError> {
        let rows = sqlx::query(&format!("{VENDOR_SELECT} ORDER BY name"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_vendors", e))?;
        rows.iter().map(decode_vendor).collect()
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        let mut conn = self.conn().await?;
        fetch_transaction(&mut conn, id, false).await
    }

    async fn get_purchase_order(&self, id: PurchaseOrderId) -> Result<Option<PurchaseOrder>, StoreError> {
        let mut conn = self.conn().await?;
        fetch_purchase_order(&mut conn, id, false).await
    }

    async fn adjustments_for_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<InventoryAdjustment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, number, product_id, adjustment_type, quantity_change, quantity_before,
                   quantity_after, reason, reference, actor_id, created_at
            FROM inventory_adjustments
            WHERE product_id = $1
            ORDER BY created_at ASC, number ASC
            "#,
        )
        .bind(*product_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("adjustments_for_product", e))?;
        rows.iter().map(decode_adjustment).collect()
    }
}

/// Unit of work over a [`PgStore`]. Dropping it rolls the database transaction back.
pub struct PgTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        fetch_product(&mut self.tx, id, true).await
    }

    async fn lock_vendor(&mut self, id: VendorId) -> Result<Option<Vendor>, StoreError> {
        fetch_vendor(&mut self.tx, id, true).await
    }

    async fn lock_transaction(&mut self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        fetch_transaction(&mut self.tx, id, true).await
    }

    async fn lock_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        fetch_purchase_order(&mut self.tx, id, true).await
    }

    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, name, vendor_id, base_price, unit_cost, tax_rate_bps,
                reorder_level, reorder_quantity, quantity_in_stock, is_active,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(*product.id.as_uuid())
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.vendor_id.map(|v| *v.as_uuid()))
        .bind(product.base_price.minor())
        .bind(product.unit_cost.minor())
        .bind(product.tax_rate_bps.map(|r| r as i32))
        .bind(product.reorder_level)
        .bind(product.reorder_quantity)
        .bind(product.quantity_in_stock())
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;
        Ok(())
    }

    async fn update_product(&mut self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE products
            SET sku = $2, name = $3, vendor_id = $4, base_price = $5, unit_cost = $6,
                tax_rate_bps = $7, reorder_level = $8, reorder_quantity = $9,
                is_active = $10, updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(*product.id.as_uuid())
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.vendor_id.map(|v| *v.as_uuid()))
        .bind(product.base_price.minor())
        .bind(product.unit_cost.minor())
        .bind(product.tax_rate_bps.map(|r| r as i32))
        .bind(product.reorder_level)
        .bind(product.reorder_quantity)
        .bind(product.is_active)
        .bind(product.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_product", e))?;
        Ok(())
    }

    async fn write_stock(&mut self, id: ProductId, quantity_in_stock: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE products SET quantity_in_stock = $2 WHERE id = $1")
            .bind(*id.as_uuid())
            .bind(quantity_in_stock)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("write_stock", e))?;
        Ok(())
    }

    async fn insert_adjustment(&mut self, adjustment: &InventoryAdjustment) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO inventory_adjustments (
                id, number, product_id, adjustment_type, quantity_change, quantity_before,
                quantity_after, reason, reference, actor_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(*adjustment.id.as_uuid())
        .bind(&adjustment.number)
        .bind(*adjustment.product_id.as_uuid())
        .bind(adjustment.adjustment_type.as_str())
        .bind(adjustment.quantity_change)
        .bind(adjustment.quantity_before)
        .bind(adjustment.quantity_after)
        .bind(adjustment.reason.as_deref())
        .bind(adjustment.reference.as_deref())
        .bind(*adjustment.actor_id.as_uuid())
        .bind(adjustment.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_adjustment", e))?;
        Ok(())
    }

    async fn insert_vendor(&mut self, vendor: &Vendor) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO vendors (id, name, contact_email, is_active, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(*vendor.id.as_uuid())
        .bind(&vendor.name)
        .bind(vendor.contact_email.as_deref())
        .bind(vendor.is_active)
        .bind(vendor.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_vendor", e))?;
        Ok(())
    }

    async fn update_vendor(&mut self, vendor: &Vendor) -> Result<(), StoreError> {
        sqlx::query("UPDATE vendors SET name = $2, contact_email = $3, is_active = $4 WHERE id = $1")
            .bind(*vendor.id.as_uuid())
            .bind(&vendor.name)
            .bind(vendor.contact_email.as_deref())
            .bind(vendor.is_active)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update_vendor", e))?;
        Ok(())
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, number, status, cashier_id, subtotal, discount_total, tax_total,
                total_amount, amount_paid, change_due, notes, created_at,
                voided_at, voided_by, void_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(*transaction.id.as_uuid())
        .bind(&transaction.number)
        .bind(transaction.status.as_str())
        .bind(*transaction.cashier_id.as_uuid())
        .bind(transaction.subtotal.minor())
        .bind(transaction.discount_total.minor())
        .bind(transaction.tax_total.minor())
        .bind(transaction.total_amount.minor())
        .bind(transaction.amount_paid.minor())
        .bind(transaction.change_due.minor())
        .bind(transaction.notes.as_deref())
        .bind(transaction.created_at)
        .bind(transaction.voided_at)
        .bind(transaction.voided_by.map(|u| *u.as_uuid()))
        .bind(transaction.void_reason.as_deref())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_transaction", e))?;

        for (position, item) in transaction.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO transaction_items (
                    id, transaction_id, position, product_id, sku, product_name, unit_price,
                    tax_rate_bps, quantity, line_discount, line_tax, line_total
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(*item.id.as_uuid())
            .bind(*transaction.id.as_uuid())
            .bind(position as i32)
            .bind(*item.product_id.as_uuid())
            .bind(&item.sku)
            .bind(&item.product_name)
            .bind(item.unit_price.minor())
            .bind(item.tax_rate_bps as i32)
            .bind(item.quantity)
            .bind(item.line_discount.minor())
            .bind(item.line_tax.minor())
            .bind(item.line_total.minor())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_transaction_item", e))?;
        }

        for (position, payment) in transaction.payments.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO payments (id, transaction_id, position, method, amount, details)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(*payment.id.as_uuid())
            .bind(*transaction.id.as_uuid())
            .bind(position as i32)
            .bind(payment.method.as_str())
            .bind(payment.amount.minor())
            .bind(&payment.details)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_payment", e))?;
        }

        Ok(())
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE transactions SET status = $2, voided_at = $3, voided_by = $4, void_reason = $5 WHERE id = $1",
        )
        .bind(*transaction.id.as_uuid())
        .bind(transaction.status.as_str())
        .bind(transaction.voided_at)
        .bind(transaction.voided_by.map(|u| *u.as_uuid()))
        .bind(transaction.void_reason.as_deref())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_transaction", e))?;
        Ok(())
    }

    async fn insert_purchase_order(&mut self, order: &PurchaseOrder) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO purchase_orders (
                id, number, vendor_id, status, subtotal, tax, shipping, other_charges, discount,
                total_amount, notes, created_by, created_at, updated_at, submitted_at,
                approved_at, approved_by, last_received_at, closed_at, cancelled_at, cancel_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21)
            "#,
        )
        .bind(*order.id.as_uuid())
        .bind(&order.number)
        .bind(*order.vendor_id.as_uuid())
        .bind(order.status.as_str())
        .bind(order.subtotal.minor())
        .bind(order.charges.tax.minor())
        .bind(order.charges.shipping.minor())
        .bind(order.charges.other_charges.minor())
        .bind(order.charges.discount.minor())
        .bind(order.total_amount.minor())
        .bind(order.notes.as_deref())
        .bind(*order.created_by.as_uuid())
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.submitted_at)
        .bind(order.approved_at)
        .bind(order.approved_by.map(|u| *u.as_uuid()))
        .bind(order.last_received_at)
        .bind(order.closed_at)
        .bind(order.cancelled_at)
        .bind(order.cancel_reason.as_deref())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_purchase_order", e))?;

        upsert_po_lines(&mut self.tx, order).await
    }

    async fn update_purchase_order(&mut self, order: &PurchaseOrder) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE purchase_orders
            SET vendor_id = $2, status = $3, subtotal = $4, tax = $5, shipping = $6,
                other_charges = $7, discount = $8, total_amount = $9, notes = $10,
                updated_at = $11, submitted_at = $12, approved_at = $13, approved_by = $14,
                last_received_at = $15, closed_at = $16, cancelled_at = $17, cancel_reason = $18
            WHERE id = $1
            "#,
        )
        .bind(*order.id.as_uuid())
        .bind(*order.vendor_id.as_uuid())
        .bind(order.status.as_str())
        .bind(order.subtotal.minor())
        .bind(order.charges.tax.minor())
        .bind(order.charges.shipping.minor())
        .bind(order.charges.other_charges.minor())
        .bind(order.charges.discount.minor())
        .bind(order.total_amount.minor())
        .bind(order.notes.as_deref())
        .bind(order.updated_at)
        .bind(order.submitted_at)
        .bind(order.approved_at)
        .bind(order.approved_by.map(|u| *u.as_uuid()))
        .bind(order.last_received_at)
        .bind(order.closed_at)
        .bind(order.cancelled_at)
        .bind(order.cancel_reason.as_deref())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_purchase_order", e))?;

        let keep: Vec<Uuid> = order.lines.iter().map(|l| *l.id.as_uuid()).collect();
        sqlx::query("DELETE FROM po_line_items WHERE purchase_order_id = $1 AND NOT (id = ANY($2))")
            .bind(*order.id.as_uuid())
            .bind(keep.as_slice())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("prune_po_lines", e))?;

        upsert_po_lines(&mut self.tx, order).await
    }

    async fn next_number(&mut self, sequence: Sequence) -> Result<i64, StoreError> {
        sqlx::query_scalar::<_, i64>("SELECT nextval($1::regclass)")
            .bind(sequence.name())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("next_number", e))
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

async fn upsert_po_lines(conn: &mut PgConnection, order: &PurchaseOrder) -> Result<(), StoreError> {
    for (position, line) in order.lines.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO po_line_items (
                id, purchase_order_id, position, product_id, quantity_ordered,
                quantity_received, unit_cost, line_total
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
            SET position = EXCLUDED.position,
                quantity_ordered = EXCLUDED.quantity_ordered,
                quantity_received = EXCLUDED.quantity_received,
                unit_cost = EXCLUDED.unit_cost,
                line_total = EXCLUDED.line_total
            "#,
        )
        .bind(*line.id.as_uuid())
        .bind(*order.id.as_uuid())
        .bind(position as i32)
        .bind(*line.product_id.as_uuid())
        .bind(line.quantity_ordered)
        .bind(line.quantity_received)
        .bind(line.unit_cost.minor())
        .bind(line.line_total.minor())
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("upsert_po_line", e))?;
    }
    Ok(())
}

const PRODUCT_SELECT: &str = r#"
    SELECT id, sku, name, vendor_id, base_price, unit_cost, tax_rate_bps, reorder_level,
           reorder_quantity, quantity_in_stock, is_active, created_at, updated_at
    FROM products
"#;

const VENDOR_SELECT: &str = "SELECT id, name, contact_email, is_active, created_at FROM vendors";

fn locking(sql: String, lock: bool) -> String {
    if lock { format!("{sql} FOR UPDATE") } else { sql }
}

async fn fetch_product(
    conn: &mut PgConnection,
    id: ProductId,
    lock: bool,
) -> Result<Option<Product>, StoreError> {
    let sql = locking(format!("{PRODUCT_SELECT} WHERE id = $1"), lock);
    let row = sqlx::query(&sql)
        .bind(*id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("fetch_product", e))?;
    row.as_ref().map(decode_product).transpose()
}

async fn fetch_vendor(
    conn: &mut PgConnection,
    id: VendorId,
    lock: bool,
) -> Result<Option<Vendor>, StoreError> {
    let sql = locking(format!("{VENDOR_SELECT} WHERE id = $1"), lock);
    let row = sqlx::query(&sql)
        .bind(*id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("fetch_vendor", e))?;
    row.as_ref().map(decode_vendor).transpose()
}

async fn fetch_transaction(
    conn: &mut PgConnection,
    id: TransactionId,
    lock: bool,
) -> Result<Option<Transaction>, StoreError> {
    let sql = locking(
        r#"
        SELECT id, number, status, cashier_id, subtotal, discount_total, tax_total, total_amount,
               amount_paid, change_due, notes, created_at, voided_at, voided_by, void_reason
        FROM transactions
        WHERE id = $1
        "#
        .to_string(),
        lock,
    );
    let Some(header) = sqlx::query(&sql)
        .bind(*id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("fetch_transaction", e))?
    else {
        return Ok(None);
    };

    let item_rows = sqlx::query(
        r#"
        SELECT id, transaction_id, product_id, sku, product_name, unit_price, tax_rate_bps,
               quantity, line_discount, line_tax, line_total
        FROM transaction_items
        WHERE transaction_id = $1
        ORDER BY position
        "#,
    )
    .bind(*id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("fetch_transaction_items", e))?;

    let payment_rows = sqlx::query(
        r#"
        SELECT id, transaction_id, method, amount, details
        FROM payments
        WHERE transaction_id = $1
        ORDER BY position
        "#,
    )
    .bind(*id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("fetch_payments", e))?;

    let items = item_rows
        .iter()
        .map(decode_transaction_item)
        .collect::<Result<Vec<_>, _>>()?;
    let payments = payment_rows
        .iter()
        .map(decode_payment)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(Transaction {
        id: TransactionId::from_uuid(get(&header, "id")?),
        number: get(&header, "number")?,
        status: parse_col(&header, "status")?,
        cashier_id: UserId::from_uuid(get(&header, "cashier_id")?),
        items,
        payments,
        subtotal: money(&header, "subtotal")?,
        discount_total: money(&header, "discount_total")?,
        tax_total: money(&header, "tax_total")?,
        total_amount: money(&header, "total_amount")?,
        amount_paid: money(&header, "amount_paid")?,
        change_due: money(&header, "change_due")?,
        notes: get(&header, "notes")?,
        created_at: get(&header, "created_at")?,
        voided_at: get(&header, "voided_at")?,
        voided_by: get::<Option<Uuid>>(&header, "voided_by")?.map(UserId::from_uuid),
        void_reason: get(&header, "void_reason")?,
    }))
}

async fn fetch_purchase_order(
    conn: &mut PgConnection,
    id: PurchaseOrderId,
    lock: bool,
) -> Result<Option<PurchaseOrder>, StoreError> {
    let sql = locking(
        r#"
        SELECT id, number, vendor_id, status, subtotal, tax, shipping, other_charges, discount,
               total_amount, notes, created_by, created_at, updated_at, submitted_at, approved_at,
               approved_by, last_received_at, closed_at, cancelled_at, cancel_reason
        FROM purchase_orders
        WHERE id = $1
        "#
        .to_string(),
        lock,
    );
    let Some(header) = sqlx::query(&sql)
        .bind(*id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("fetch_purchase_order", e))?
    else {
        return Ok(None);
    };

    let line_rows = sqlx::query(
        r#"
        SELECT id, purchase_order_id, product_id, quantity_ordered, quantity_received,
               unit_cost, line_total
        FROM po_line_items
        WHERE purchase_order_id = $1
        ORDER BY position
        "#,
    )
    .bind(*id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("fetch_po_lines", e))?;

    let lines = line_rows
        .iter()
        .map(decode_po_line)
        .collect::<Result<Vec<_>, _>>()?;
    debug!(purchase_order_id = %id, lines = lines.len(), "loaded purchase order");

    Ok(Some(PurchaseOrder {
        id: PurchaseOrderId::from_uuid(get(&header, "id")?),
        number: get(&header, "number")?,
        vendor_id: VendorId::from_uuid(get(&header, "vendor_id")?),
        status: parse_col(&header, "status")?,
        lines,
        subtotal: money(&header, "subtotal")?,
        charges: PoCharges {
            tax: money(&header, "tax")?,
            shipping: money(&header, "shipping")?,
            other_charges: money(&header, "other_charges")?,
            discount: money(&header, "discount")?,
        },
        total_amount: money(&header, "total_amount")?,
        notes: get(&header, "notes")?,
        created_by: UserId::from_uuid(get(&header, "created_by")?),
        created_at: get(&header, "created_at")?,
        updated_at: get(&header, "updated_at")?,
        submitted_at: get(&header, "submitted_at")?,
        approved_at: get(&header, "approved_at")?,
        approved_by: get::<Option<Uuid>>(&header, "approved_by")?.map(UserId::from_uuid),
        last_received_at: get(&header, "last_received_at")?,
        closed_at: get(&header, "closed_at")?,
        cancelled_at: get(&header, "cancelled_at")?,
        cancel_reason: get(&header, "cancel_reason")?,
    }))
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Decode(format!("column {column}: {e}")))
}

fn money(row: &PgRow, column: &str) -> Result<Money, StoreError> {
    get::<i64>(row, column).map(Money::from_minor)
}

fn parse_col<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    let raw: String = get(row, column)?;
    raw.parse()
        .map_err(|e: T::Err| StoreError::Decode(format!("column {column}: {e}")))
}

fn bps(row: &PgRow, column: &str) -> Result<Option<u32>, StoreError> {
    get::<Option<i32>>(row, column)?
        .map(|v| u32::try_from(v).map_err(|e| StoreError::Decode(format!("column {column}: {e}"))))
        .transpose()
}

fn decode_product(row: &PgRow) -> Result<Product, StoreError> {
    let id = ProductId::from_uuid(get(row, "id")?);
    let created_at: DateTime<Utc> = get(row, "created_at")?;
    let input = NewProduct {
        sku: get(row, "sku")?,
        name: get(row, "name")?,
        vendor_id: get::<Option<Uuid>>(row, "vendor_id")?.map(VendorId::from_uuid),
        base_price: money(row, "base_price")?,
        unit_cost: money(row, "unit_cost")?,
        tax_rate_bps: bps(row, "tax_rate_bps")?,
        reorder_level: get(row, "reorder_level")?,
        reorder_quantity: get(row, "reorder_quantity")?,
        opening_quantity: 0,
    };
    let mut product = Product::register(id, &input, created_at)
        .map_err(|e| StoreError::Decode(format!("product {id}: {e}")))?;
    product.is_active = get(row, "is_active")?;
    product.updated_at = get(row, "updated_at")?;
    Ok(product.with_stored_quantity(get(row, "quantity_in_stock")?))
}

fn decode_vendor(row: &PgRow) -> Result<Vendor, StoreError> {
    Ok(Vendor {
        id: VendorId::from_uuid(get(row, "id")?),
        name: get(row, "name")?,
        contact_email: get(row, "contact_email")?,
        is_active: get(row, "is_active")?,
        created_at: get(row, "created_at")?,
    })
}

fn decode_adjustment(row: &PgRow) -> Result<InventoryAdjustment, StoreError> {
    Ok(InventoryAdjustment {
        id: AdjustmentId::from_uuid(get(row, "id")?),
        number: get(row, "number")?,
        product_id: ProductId::from_uuid(get(row, "product_id")?),
        adjustment_type: parse_col(row, "adjustment_type")?,
        quantity_change: get(row, "quantity_change")?,
        quantity_before: get(row, "quantity_before")?,
        quantity_after: get(row, "quantity_after")?,
        reason: get(row, "reason")?,
        reference: get(row, "reference")?,
        actor_id: UserId::from_uuid(get(row, "actor_id")?),
        created_at: get(row, "created_at")?,
    })
}

fn decode_transaction_item(row: &PgRow) -> Result<TransactionItem, StoreError> {
    Ok(TransactionItem {
        id: TransactionItemId::from_uuid(get(row, "id")?),
        transaction_id: TransactionId::from_uuid(get(row, "transaction_id")?),
        product_id: ProductId::from_uuid(get(row, "product_id")?),
        sku: get(row, "sku")?,
        product_name: get(row, "product_name")?,
        unit_price: money(row, "unit_price")?,
        tax_rate_bps: bps(row, "tax_rate_bps")?.unwrap_or_default(),
        quantity: get(row, "quantity")?,
        line_discount: money(row, "line_discount")?,
        line_tax: money(row, "line_tax")?,
        line_total: money(row, "line_total")?,
    })
}

fn decode_payment(row: &PgRow) -> Result<Payment, StoreError> {
    Ok(Payment {
        id: PaymentId::from_uuid(get(row, "id")?),
        transaction_id: TransactionId::from_uuid(get(row, "transaction_id")?),
        method: parse_col(row, "method")?,
        amount: money(row, "amount")?,
        details: get(row, "details")?,
    })
}

fn decode_po_line(row: &PgRow) -> Result<PoLineItem, StoreError> {
    Ok(PoLineItem {
        id: PoLineItemId::from_uuid(get(row, "id")?),
        purchase_order_id: PurchaseOrderId::from_uuid(get(row, "purchase_order_id")?),
        product_id: ProductId::from_uuid(get(row, "product_id")?),
        quantity_ordered: get(row, "quantity_ordered")?,
        quantity_received: get(row, "quantity_received")?,
        unit_cost: money(row, "unit_cost")?,
        line_total: money(row, "line_total")?,
    })
}

/// Map SQLx errors onto `StoreError` by SQLSTATE.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("55P03") => StoreError::LockTimeout(msg),
                Some("40P01") => StoreError::Deadlock(msg),
                Some("23505") => StoreError::UniqueViolation(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {operation}")),
        sqlx::Error::PoolTimedOut => {
            StoreError::Backend(format!("timed out waiting for a connection in {operation}"))
        }
        sqlx::Error::ColumnDecode { index, source } => {
            StoreError::Decode(format!("column {index} in {operation}: {source}"))
        }
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_DATABASE_URL: &str = "TILLPOINT_TEST_DATABASE_URL";

    async fn test_store() -> Option<PgStore> {
        let url = std::env::var(TEST_DATABASE_URL).ok()?;
        let config = EngineConfig {
            database_url: Some(url),
            lock_timeout: Duration::from_millis(500),
            ..EngineConfig::default()
        };
        let store = PgStore::connect(&config).await.ok()?;
        store.migrate().await.ok()?;
        Some(store)
    }

    fn product(sku: &str) -> Product {
        Product::register(
            ProductId::new(),
            &NewProduct {
                sku: sku.to_string(),
                name: "Bolt".to_string(),
                vendor_id: None,
                base_price: Money::from_minor(150),
                unit_cost: Money::from_minor(60),
                tax_rate_bps: Some(825),
                reorder_level: 3,
                reorder_quantity: 10,
                opening_quantity: 0,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    #[ignore = "requires TILLPOINT_TEST_DATABASE_URL"]
    async fn product_round_trips_and_locks() {
        let Some(store) = test_store().await else { return };
        let p = product(&format!("PG-{}", Uuid::now_v7()));

        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&p).await.unwrap();
        tx.write_stock(p.id, 4).await.unwrap();
        tx.commit().await.unwrap();

        let loaded = store.get_product(p.id).await.unwrap().unwrap();
        assert_eq!(loaded.sku, p.sku);
        assert_eq!(loaded.tax_rate_bps, Some(825));
        assert_eq!(loaded.quantity_in_stock(), 4);

        let mut holder = store.begin().await.unwrap();
        holder.lock_product(p.id).await.unwrap();
        let mut waiter = store.begin().await.unwrap();
        let err = waiter.lock_product(p.id).await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));
    }

    #[tokio::test]
    #[ignore = "requires TILLPOINT_TEST_DATABASE_URL"]
    async fn duplicate_sku_maps_to_unique_violation() {
        let Some(store) = test_store().await else { return };
        let sku = format!("PG-{}", Uuid::now_v7());

        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&product(&sku)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx.insert_product(&product(&sku)).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    #[ignore = "requires TILLPOINT_TEST_DATABASE_URL"]
    async fn sequences_advance() {
        let Some(store) = test_store().await else { return };
        let mut tx = store.begin().await.unwrap();
        let a = tx.next_number(Sequence::Transaction).await.unwrap();
        let b = tx.next_number(Sequence::Transaction).await.unwrap();
        assert!(b > a);
    }
}
