use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tillpoint_core::{AdjustmentId, DomainError, DomainResult, Entity, ProductId, UserId};
use tillpoint_products::Product;

/// Why a product's quantity on hand changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentType {
    Damage,
    Theft,
    Found,
    Correction,
    Initial,
    Sale,
    SaleVoid,
    PoReceive,
}

impl AdjustmentType {
    pub const ALL: [AdjustmentType; 8] = [
        AdjustmentType::Damage,
        AdjustmentType::Theft,
        AdjustmentType::Found,
        AdjustmentType::Correction,
        AdjustmentType::Initial,
        AdjustmentType::Sale,
        AdjustmentType::SaleVoid,
        AdjustmentType::PoReceive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AdjustmentType::Damage => "damage",
            AdjustmentType::Theft => "theft",
            AdjustmentType::Found => "found",
            AdjustmentType::Correction => "correction",
            AdjustmentType::Initial => "initial",
            AdjustmentType::Sale => "sale",
            AdjustmentType::SaleVoid => "sale_void",
            AdjustmentType::PoReceive => "po_receive",
        }
    }

    /// Types an operator records by hand; these always need a reason.
    pub fn is_manual(self) -> bool {
        matches!(
            self,
            AdjustmentType::Damage
                | AdjustmentType::Theft
                | AdjustmentType::Found
                | AdjustmentType::Correction
        )
    }

    /// Sign the delta must carry: `Some(-1)` removes stock, `Some(1)` adds it,
    /// `None` allows either (corrections).
    pub fn required_sign(self) -> Option<i64> {
        match self {
            AdjustmentType::Damage | AdjustmentType::Theft | AdjustmentType::Sale => Some(-1),
            AdjustmentType::Found
            | AdjustmentType::Initial
            | AdjustmentType::SaleVoid
            | AdjustmentType::PoReceive => Some(1),
            AdjustmentType::Correction => None,
        }
    }
}

impl core::fmt::Display for AdjustmentType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AdjustmentType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AdjustmentType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown adjustment type: {s}")))
    }
}

/// A request to move stock for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentRequest {
    pub product_id: ProductId,
    pub delta: i64,
    pub adjustment_type: AdjustmentType,
    pub reason: Option<String>,
    /// Human-facing number of the document that caused the movement (e.g. `TXN-000042`).
    pub reference: Option<String>,
    pub actor_id: UserId,
}

impl AdjustmentRequest {
    /// Shape checks that do not need the product row.
    pub fn validate(&self) -> DomainResult<()> {
        if self.delta == 0 {
            return Err(DomainError::validation("delta cannot be zero"));
        }
        if let Some(sign) = self.adjustment_type.required_sign() {
            if self.delta.signum() != sign {
                return Err(DomainError::validation(format!(
                    "{} adjustments must {} stock",
                    self.adjustment_type,
                    if sign < 0 { "remove" } else { "add" }
                )));
            }
        }
        if self.adjustment_type.is_manual()
            && self.reason.as_deref().is_none_or(|r| r.trim().is_empty())
        {
            return Err(DomainError::validation(format!(
                "reason is required for {} adjustments",
                self.adjustment_type
            )));
        }
        Ok(())
    }
}

/// Quantity on hand before and after a ledger movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub product_id: ProductId,
    pub quantity_before: i64,
    pub quantity_after: i64,
}

impl StockMovement {
    pub fn delta(&self) -> i64 {
        self.quantity_after - self.quantity_before
    }
}

/// Decide the movement for `request` against the locked, current product row.
///
/// This is the explicit form of the stock trigger: it never mutates anything,
/// and a rejection here means nothing is written.
pub fn plan_movement(product: &Product, request: &AdjustmentRequest) -> DomainResult<StockMovement> {
    if product.id != request.product_id {
        return Err(DomainError::validation("product_id mismatch"));
    }
    request.validate()?;
    product.ensure_active()?;

    let quantity_before = product.quantity_in_stock();
    let quantity_after = quantity_before
        .checked_add(request.delta)
        .ok_or_else(|| DomainError::validation("quantity overflow"))?;

    if quantity_after < 0 {
        return Err(DomainError::InsufficientStock {
            product_id: product.id,
            available: quantity_before,
            // `i64::MIN` reports as `i64::MAX`.
            requested: request.delta.saturating_neg(),
        });
    }

    Ok(StockMovement {
        product_id: product.id,
        quantity_before,
        quantity_after,
    })
}

/// Append-only audit row written for every successful movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryAdjustment {
    pub id: AdjustmentId,
    /// `ADJ-######`.
    pub number: String,
    pub product_id: ProductId,
    pub adjustment_type: AdjustmentType,
    pub quantity_change: i64,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub reason: Option<String>,
    pub reference: Option<String>,
    pub actor_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl InventoryAdjustment {
    pub fn record(
        id: AdjustmentId,
        number: String,
        request: &AdjustmentRequest,
        movement: &StockMovement,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            number,
            product_id: movement.product_id,
            adjustment_type: request.adjustment_type,
            quantity_change: movement.delta(),
            quantity_before: movement.quantity_before,
            quantity_after: movement.quantity_after,
            reason: request
                .reason
                .as_ref()
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
            reference: request.reference.clone(),
            actor_id: request.actor_id,
            created_at: now,
        }
    }
}

impl Entity for InventoryAdjustment {
    type Id = AdjustmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

pub fn format_adjustment_number(sequence: i64) -> String {
    format!("ADJ-{sequence:06}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tillpoint_core::Money;
    use tillpoint_products::NewProduct;

    fn product_with(quantity: i64) -> Product {
        let input = NewProduct {
            sku: "SKU-1".to_string(),
            name: "Widget".to_string(),
            vendor_id: None,
            base_price: Money::from_minor(1_000),
            unit_cost: Money::from_minor(400),
            tax_rate_bps: None,
            reorder_level: 5,
            reorder_quantity: 10,
            opening_quantity: 0,
        };
        Product::register(ProductId::new(), &input, Utc::now())
            .unwrap()
            .with_stored_quantity(quantity)
    }

    fn request(product: &Product, delta: i64, adjustment_type: AdjustmentType) -> AdjustmentRequest {
        AdjustmentRequest {
            product_id: product.id,
            delta,
            adjustment_type,
            reason: Some("cycle count".to_string()),
            reference: None,
            actor_id: UserId::new(),
        }
    }

    #[test]
    fn movement_reports_before_and_after() {
        let product = product_with(10);
        let movement = plan_movement(&product, &request(&product, -6, AdjustmentType::Sale)).unwrap();
        assert_eq!(movement.quantity_before, 10);
        assert_eq!(movement.quantity_after, 4);
        assert_eq!(movement.delta(), -6);
    }

    #[test]
    fn movement_below_zero_is_insufficient_stock() {
        let product = product_with(2);
        let err = plan_movement(&product, &request(&product, -3, AdjustmentType::Sale)).unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientStock {
                product_id: product.id,
                available: 2,
                requested: 3,
            }
        );
    }

    #[test]
    fn extreme_deltas_are_rejected_without_overflow() {
        let product = product_with(7);
        let err = plan_movement(&product, &request(&product, i64::MIN, AdjustmentType::Correction))
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientStock {
                product_id: product.id,
                available: 7,
                requested: i64::MAX,
            }
        );

        let err = plan_movement(&product, &request(&product, i64::MAX, AdjustmentType::Found))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let empty = product_with(0);
        let movement =
            plan_movement(&empty, &request(&empty, i64::MAX, AdjustmentType::Found)).unwrap();
        assert_eq!(movement.quantity_after, i64::MAX);
    }

    #[test]
    fn draining_to_exactly_zero_is_allowed() {
        let product = product_with(3);
        let movement = plan_movement(&product, &request(&product, -3, AdjustmentType::Damage)).unwrap();
        assert_eq!(movement.quantity_after, 0);
    }

    #[test]
    fn zero_delta_is_rejected() {
        let product = product_with(3);
        let err = plan_movement(&product, &request(&product, 0, AdjustmentType::Correction)).unwrap_err();
        assert_eq!(err, DomainError::validation("delta cannot be zero"));
    }

    #[test]
    fn manual_types_require_a_reason() {
        let product = product_with(3);
        let mut req = request(&product, -1, AdjustmentType::Theft);
        req.reason = Some("   ".to_string());
        assert!(matches!(plan_movement(&product, &req), Err(DomainError::Validation(_))));

        // System-generated types do not.
        let mut req = request(&product, 1, AdjustmentType::SaleVoid);
        req.reason = None;
        assert!(plan_movement(&product, &req).is_ok());
    }

    #[test]
    fn type_direction_is_enforced() {
        let product = product_with(3);
        assert!(plan_movement(&product, &request(&product, 1, AdjustmentType::Damage)).is_err());
        assert!(plan_movement(&product, &request(&product, -1, AdjustmentType::PoReceive)).is_err());
        assert!(plan_movement(&product, &request(&product, -1, AdjustmentType::Correction)).is_ok());
        assert!(plan_movement(&product, &request(&product, 1, AdjustmentType::Correction)).is_ok());
    }

    #[test]
    fn inactive_products_cannot_move() {
        let mut product = product_with(3);
        product.deactivate(Utc::now()).unwrap();
        let err = plan_movement(&product, &request(&product, 1, AdjustmentType::Found)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("inactive")));
    }

    #[test]
    fn adjustment_type_parses_its_own_names() {
        for t in AdjustmentType::ALL {
            assert_eq!(t.as_str().parse::<AdjustmentType>().unwrap(), t);
        }
        assert!("refund".parse::<AdjustmentType>().is_err());
    }

    #[test]
    fn record_copies_movement_and_trims_reason() {
        let product = product_with(10);
        let mut req = request(&product, -2, AdjustmentType::Damage);
        req.reason = Some("  dropped pallet ".to_string());
        let movement = plan_movement(&product, &req).unwrap();
        let row = InventoryAdjustment::record(
            AdjustmentId::new(),
            format_adjustment_number(7),
            &req,
            &movement,
            Utc::now(),
        );
        assert_eq!(row.number, "ADJ-000007");
        assert_eq!(row.quantity_change, -2);
        assert_eq!(row.quantity_before, 10);
        assert_eq!(row.quantity_after, 8);
        assert_eq!(row.reason.as_deref(), Some("dropped pallet"));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 512,
            ..ProptestConfig::default()
        })]

        /// Property: applying any sequence of planned movements never goes negative,
        /// and a rejected movement leaves the quantity where it was.
        #[test]
        fn planned_movements_never_go_negative(
            start in 0i64..100,
            deltas in prop::collection::vec(
                prop_oneof![8 => -50i64..50, 1 => Just(i64::MIN), 1 => Just(i64::MAX)],
                1..40
            )
        ) {
            let mut product = product_with(start);
            for delta in deltas.into_iter().filter(|d| *d != 0) {
                let before = product.quantity_in_stock();
                match plan_movement(&product, &request(&product, delta, AdjustmentType::Correction)) {
                    Ok(movement) => {
                        prop_assert!(movement.quantity_after >= 0);
                        prop_assert_eq!(movement.quantity_before, before);
                        product = product.with_stored_quantity(movement.quantity_after);
                    }
                    Err(DomainError::InsufficientStock { available, .. }) => {
                        prop_assert_eq!(available, before);
                        prop_assert!(before.checked_add(delta).is_some_and(|q| q < 0));
                    }
                    Err(DomainError::Validation(_)) => {
                        prop_assert!(before.checked_add(delta).is_none());
                    }
                    Err(other) => prop_assert!(false, "unexpected error {:?}", other),
                }
            }
        }
    }
}
