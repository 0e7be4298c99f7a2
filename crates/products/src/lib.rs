//! Products domain module.
//!
//! Catalog records as the inventory engine sees them: identity, selling price,
//! cost, tax override, reorder thresholds, and the quantity on hand that only the
//! inventory ledger is allowed to move. Pure domain logic (no IO, no storage).

pub mod product;

pub use product::{NewProduct, Product, MAX_TAX_RATE_BPS};
