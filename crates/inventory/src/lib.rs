//! Inventory domain module.
//!
//! The stock-movement rules behind the inventory ledger, implemented purely as
//! deterministic domain logic (no IO, no storage). Storage adapters apply the
//! planned movement and persist the audit row inside one unit of work.

pub mod adjustment;

pub use adjustment::{
    AdjustmentRequest, AdjustmentType, InventoryAdjustment, StockMovement, format_adjustment_number,
    plan_movement,
};
