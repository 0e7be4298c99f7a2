//! Reorder advisor. Read-only.

use std::sync::Arc;

use tracing::{debug, instrument};

use tillpoint_purchasing::{ReorderSuggestion, build_reorder_suggestions};

use crate::error::ServiceResult;
use crate::store::Store;

pub struct ReorderService<S> {
    store: Arc<S>,
}

impl<S> Clone for ReorderService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> ReorderService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Active products at or below their reorder level, grouped by vendor.
    #[instrument(skip(self), err(level = "warn"))]
    pub async fn get_reorder_suggestions(&self) -> ServiceResult<Vec<ReorderSuggestion>> {
        let products = self.store.list_products().await?;
        let vendors = self.store.list_vendors().await?;
        let suggestions = build_reorder_suggestions(&products, &vendors)?;
        debug!(
            groups = suggestions.len(),
            lines = suggestions.iter().map(|s| s.lines.len()).sum::<usize>(),
            "reorder suggestions built"
        );
        Ok(suggestions)
    }
}

#[cfg(test)]
mod tests {
    use crate::services::testkit::{actor, engine, product_for_vendor, vendor};
    use tillpoint_core::Money;

    #[tokio::test]
    async fn suggestions_reflect_committed_stock() {
        let engine = engine();
        let acme = vendor(&engine, "Acme").await;
        let low = product_for_vendor(&engine, "LOW-1", acme.id, 3).await;
        let fine = product_for_vendor(&engine, "OK-1", acme.id, 50).await;

        let suggestions = engine.reorder.get_reorder_suggestions().await.unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].vendor_id, Some(acme.id));
        assert_eq!(suggestions[0].lines.len(), 1);
        assert_eq!(suggestions[0].lines[0].product_id, low.id);
        assert_eq!(suggestions[0].lines[0].suggested_quantity, 20);
        assert_eq!(suggestions[0].lines[0].unit_cost, Money::from_minor(500));
        assert!(suggestions[0].lines.iter().all(|l| l.product_id != fine.id));

        engine.catalog.deactivate_product(low.id, actor()).await.unwrap();
        assert!(engine.reorder.get_reorder_suggestions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reading_suggestions_changes_nothing() {
        let engine = engine();
        let acme = vendor(&engine, "Acme").await;
        let low = product_for_vendor(&engine, "LOW-1", acme.id, 1).await;

        let first = engine.reorder.get_reorder_suggestions().await.unwrap();
        let second = engine.reorder.get_reorder_suggestions().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.adjustments.adjustment_history(low.id).await.unwrap().len(), 1);
    }
}
