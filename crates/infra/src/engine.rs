//! Wiring: one store shared by every service.

use std::sync::Arc;

use tracing::info;

use crate::config::EngineConfig;
use crate::error::StoreError;
use crate::services::{AdjustmentService, CatalogService, PurchasingService, ReorderService, SalesService};
use crate::store::{InMemoryStore, PgStore, Store};

/// The order engine's operation surface.
pub struct Engine<S> {
    pub catalog: CatalogService<S>,
    pub sales: SalesService<S>,
    pub purchasing: PurchasingService<S>,
    pub adjustments: AdjustmentService<S>,
    pub reorder: ReorderService<S>,
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            catalog: self.catalog.clone(),
            sales: self.sales.clone(),
            purchasing: self.purchasing.clone(),
            adjustments: self.adjustments.clone(),
            reorder: self.reorder.clone(),
        }
    }
}

impl<S: Store> Engine<S> {
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Self {
        Self {
            catalog: CatalogService::new(Arc::clone(&store)),
            sales: SalesService::new(Arc::clone(&store), config.default_tax_rate_bps),
            purchasing: PurchasingService::new(Arc::clone(&store)),
            adjustments: AdjustmentService::new(Arc::clone(&store)),
            reorder: ReorderService::new(store),
        }
    }
}

impl Engine<InMemoryStore> {
    /// Start with logging installed and an empty in-memory store.
    pub fn in_memory(config: &EngineConfig) -> Self {
        config.init_logging();
        info!(lock_timeout_ms = config.lock_timeout.as_millis() as u64, "starting in-memory engine");
        Self::new(Arc::new(InMemoryStore::new(config.lock_timeout)), config)
    }
}

impl Engine<PgStore> {
    /// Connect to the configured database and bring its schema up to date.
    pub async fn postgres(config: &EngineConfig) -> Result<Self, StoreError> {
        config.init_logging();
        let store = PgStore::connect(config).await?;
        store.migrate().await?;
        info!(max_connections = config.db_max_connections, "connected to postgres");
        Ok(Self::new(Arc::new(store), config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testkit::{actor, new_product};
    use std::time::Duration;

    #[tokio::test]
    async fn services_share_one_store() {
        let engine = Engine::in_memory(&EngineConfig::default());
        let product = engine
            .catalog
            .register_product(&new_product("SHARED-1", 500, 3), actor())
            .await
            .unwrap();

        let cloned = engine.clone();
        let history = cloned.adjustments.adjustment_history(product.id).await.unwrap();
        assert_eq!(history.len(), 1);

        cloned.catalog.deactivate_product(product.id, actor()).await.unwrap();
        assert!(!engine.catalog.get_product(product.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn starting_an_engine_installs_the_configured_subscriber() {
        let config = EngineConfig {
            log_format: tillpoint_observability::LogFormat::Pretty,
            ..EngineConfig::default()
        };
        let _engine = Engine::in_memory(&config);
        assert!(tracing::dispatcher::has_been_set());
    }

    #[tokio::test]
    async fn postgres_requires_a_database_url() {
        let config = EngineConfig {
            database_url: None,
            lock_timeout: Duration::from_millis(10),
            ..EngineConfig::default()
        };
        let err = match Engine::postgres(&config).await {
            Ok(_) => panic!("connected without a url"),
            Err(err) => err,
        };
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
