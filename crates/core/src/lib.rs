//! Domain foundation building blocks for tillpoint.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, money, and the error taxonomy shared by every engine component.

pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult, ErrorKind};
pub use id::{
    AdjustmentId, PaymentId, PoLineItemId, ProductId, PurchaseOrderId, TransactionId,
    TransactionItemId, UserId, VendorId,
};
pub use value_object::{Money, ValueObject};
