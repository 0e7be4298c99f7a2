//! Infrastructure layer: storage, configuration, the inventory ledger and the
//! engine's services.

pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod services;
pub mod store;

pub use config::{ConfigError, EngineConfig};
pub use engine::Engine;
pub use error::{ServiceError, ServiceResult, StoreError};
pub use store::{InMemoryStore, PgStore, Sequence, Store, StoreTx};
