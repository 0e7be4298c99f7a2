//! Domain error model.

use thiserror::Error;

use crate::id::{PoLineItemId, ProductId};
use crate::value_object::Money;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every failure an engine operation can report to its caller. Each variant is
/// detected either before any mutation starts or inside the single unit of work
/// that is then rolled back, so none of them ever leaves a partial effect behind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or missing input, caught before any mutation attempt.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An entity id did not resolve.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A stock mutation would drive quantity on hand below zero.
    #[error("insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: ProductId,
        available: i64,
        requested: i64,
    },

    /// Payments recorded against a sale do not cover its total.
    #[error("insufficient payment: total {total}, paid {paid}")]
    InsufficientPayment { total: Money, paid: Money },

    /// Receiving more than the quantity still outstanding on a purchase order line.
    #[error(
        "over-receipt on line {line_item_id}: ordered {ordered}, already received {already_received}, attempted {attempted}"
    )]
    OverReceive {
        line_item_id: PoLineItemId,
        ordered: i64,
        already_received: i64,
        attempted: i64,
    },

    /// The operation is not legal for the entity's current status.
    #[error("cannot {action} {entity} in status {from}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        action: &'static str,
    },

    /// A row lock could not be acquired in time; the whole operation may be retried.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),
}

/// Error category, for callers that map errors onto transport status codes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InsufficientStock,
    InsufficientPayment,
    OverReceive,
    InvalidStateTransition,
    ConcurrencyConflict,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InsufficientStock => "insufficient_stock",
            ErrorKind::InsufficientPayment => "insufficient_payment",
            ErrorKind::OverReceive => "over_receive",
            ErrorKind::InvalidStateTransition => "invalid_state_transition",
            ErrorKind::ConcurrencyConflict => "concurrency_conflict",
        }
    }

    /// Whether retrying the identical call can succeed without any other change.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::ConcurrencyConflict)
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// A monetary amount or quantity that does not fit in 64 bits.
    pub fn amount_out_of_range(what: &str) -> Self {
        Self::Validation(format!("{what} is out of range"))
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_transition(
        entity: &'static str,
        from: impl ToString,
        action: &'static str,
    ) -> Self {
        Self::InvalidStateTransition {
            entity,
            from: from.to_string(),
            action,
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::ConcurrencyConflict(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Validation(_) => ErrorKind::Validation,
            DomainError::NotFound { .. } => ErrorKind::NotFound,
            DomainError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            DomainError::InsufficientPayment { .. } => ErrorKind::InsufficientPayment,
            DomainError::OverReceive { .. } => ErrorKind::OverReceive,
            DomainError::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            DomainError::ConcurrencyConflict(_) => ErrorKind::ConcurrencyConflict,
        }
    }
}
