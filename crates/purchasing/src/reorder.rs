//! Low-stock scan grouped by vendor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tillpoint_core::{DomainError, DomainResult, Money, ProductId, VendorId};
use tillpoint_products::Product;

use crate::order::{CreatePurchaseOrder, PoCharges, PoLineInput};
use crate::vendor::Vendor;

/// One product that should be restocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderLine {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub quantity_in_stock: i64,
    pub reorder_level: i64,
    pub suggested_quantity: i64,
    pub unit_cost: Money,
    pub estimated_cost: Money,
}

/// Suggested restock for a single vendor.
///
/// `vendor_id == None` collects low-stock products with no usable vendor
/// (unassigned, unknown, or inactive). Those cannot seed a purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderSuggestion {
    pub vendor_id: Option<VendorId>,
    pub vendor_name: Option<String>,
    pub lines: Vec<ReorderLine>,
    pub estimated_total: Money,
}

impl ReorderSuggestion {
    pub fn to_purchase_order_request(&self, notes: Option<String>) -> DomainResult<CreatePurchaseOrder> {
        let vendor_id = self.vendor_id.ok_or_else(|| {
            DomainError::validation("reorder suggestion has no active vendor")
        })?;
        Ok(CreatePurchaseOrder {
            vendor_id,
            lines: self
                .lines
                .iter()
                .map(|l| PoLineInput {
                    product_id: l.product_id,
                    quantity_ordered: l.suggested_quantity,
                    unit_cost: l.unit_cost,
                })
                .collect(),
            charges: PoCharges::default(),
            notes,
        })
    }
}

/// Build vendor-grouped suggestions from current catalog state.
///
/// Groups are ordered by vendor name with the unassigned group last; lines
/// within a group are ordered by SKU. Products with a non-positive
/// `reorder_quantity` are not suggested. An estimate too large to represent is a
/// `Validation` error.
pub fn build_reorder_suggestions(
    products: &[Product],
    vendors: &[Vendor],
) -> DomainResult<Vec<ReorderSuggestion>> {
    let active_vendors: BTreeMap<VendorId, &Vendor> = vendors
        .iter()
        .filter(|v| v.is_active)
        .map(|v| (v.id, v))
        .collect();

    let mut grouped: BTreeMap<Option<VendorId>, Vec<ReorderLine>> = BTreeMap::new();
    for product in products {
        if !product.needs_reorder() || product.reorder_quantity <= 0 {
            continue;
        }
        let vendor_id = product
            .vendor_id
            .filter(|id| active_vendors.contains_key(id));
        grouped.entry(vendor_id).or_default().push(ReorderLine {
            product_id: product.id,
            sku: product.sku.clone(),
            name: product.name.clone(),
            quantity_in_stock: product.quantity_in_stock(),
            reorder_level: product.reorder_level,
            suggested_quantity: product.reorder_quantity,
            unit_cost: product.unit_cost,
            estimated_cost: product
                .unit_cost
                .checked_mul(product.reorder_quantity)
                .ok_or_else(|| DomainError::amount_out_of_range("reorder estimate"))?,
        });
    }

    let mut suggestions = grouped
        .into_iter()
        .map(|(vendor_id, mut lines)| -> DomainResult<ReorderSuggestion> {
            lines.sort_by(|a, b| a.sku.cmp(&b.sku));
            let estimated_total =
                Money::try_sum(lines.iter().map(|l| l.estimated_cost), "reorder estimate")?;
            Ok(ReorderSuggestion {
                vendor_id,
                vendor_name: vendor_id
                    .and_then(|id| active_vendors.get(&id))
                    .map(|v| v.name.clone()),
                lines,
                estimated_total,
            })
        })
        .collect::<DomainResult<Vec<_>>>()?;

    suggestions.sort_by(|a, b| match (&a.vendor_name, &b.vendor_name) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => core::cmp::Ordering::Less,
        (None, Some(_)) => core::cmp::Ordering::Greater,
        (None, None) => core::cmp::Ordering::Equal,
    });
    Ok(suggestions)
}
