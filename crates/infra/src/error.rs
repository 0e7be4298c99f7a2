//! Storage and service error types.

use thiserror::Error;

use tillpoint_core::{DomainError, ErrorKind};

/// Failure reported by a storage backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A row lock was not granted within the configured wait.
    #[error("lock wait timed out: {0}")]
    LockTimeout(String),

    /// The backend aborted the unit of work to break a lock cycle.
    #[error("deadlock detected: {0}")]
    Deadlock(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored row could not be mapped back onto a domain type.
    #[error("failed to decode stored row: {0}")]
    Decode(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Error returned by every engine operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(StoreError),
}

impl ServiceError {
    /// Domain error kind, or `None` for a backend failure.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ServiceError::Domain(err) => Some(err.kind()),
            ServiceError::Store(_) => None,
        }
    }

    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            ServiceError::Domain(err) => Some(err),
            ServiceError::Store(_) => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_some_and(ErrorKind::is_retryable)
    }

    /// Short label for log fields.
    pub fn label(&self) -> &'static str {
        match self {
            ServiceError::Domain(err) => err.kind().as_str(),
            ServiceError::Store(_) => "store_error",
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::LockTimeout(msg) | StoreError::Deadlock(msg) => {
                ServiceError::Domain(DomainError::conflict(msg))
            }
            other => ServiceError::Store(other),
        }
    }
}
