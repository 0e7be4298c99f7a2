//! Purchasing domain module (vendors, purchase orders, reorder suggestions).
//!
//! Business rules for the purchase-order lifecycle, implemented purely as
//! deterministic domain logic (no IO, no storage). Receiving only *plans* the
//! per-line quantities here; crediting stock is the inventory ledger's job.

pub mod order;
pub mod reorder;
pub mod vendor;

pub use order::{
    CreatePurchaseOrder, PlannedReceipt, PoCharges, PoDraftEdit, PoLineInput, PoLineItem,
    PurchaseOrder, PurchaseOrderStatus, ReceiptLine, format_po_number,
};
pub use reorder::{ReorderLine, ReorderSuggestion, build_reorder_suggestions};
pub use vendor::{NewVendor, Vendor};
