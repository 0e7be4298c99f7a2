use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tillpoint_core::{DomainError, DomainResult, Money, ProductId};
use tillpoint_products::Product;

use crate::transaction::PaymentMethod;

/// One requested sale line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLineRequest {
    pub product_id: ProductId,
    pub quantity: i64,
    /// Line-level discount amount (not a percentage).
    #[serde(default)]
    pub discount: Option<Money>,
}

/// One tendered payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub method: PaymentMethod,
    pub amount: Money,
    /// Method-specific details (card reference, cash tendered, ...), stored verbatim.
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Request: create a completed sales transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTransaction {
    pub items: Vec<SaleLineRequest>,
    pub payments: Vec<PaymentRequest>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CreateTransaction {
    /// Request-shape checks, run before anything is read or locked.
    pub fn validate(&self) -> DomainResult<()> {
        if self.items.is_empty() {
            return Err(DomainError::validation("transaction must have at least one item"));
        }
        for (idx, line) in self.items.iter().enumerate() {
            if line.quantity <= 0 {
                return Err(DomainError::validation(format!(
                    "item {idx}: quantity must be positive"
                )));
            }
            if line.discount.is_some_and(Money::is_negative) {
                return Err(DomainError::validation(format!(
                    "item {idx}: discount cannot be negative"
                )));
            }
        }
        if self.payments.is_empty() {
            return Err(DomainError::validation("transaction must have at least one payment"));
        }
        for (idx, payment) in self.payments.iter().enumerate() {
            if payment.amount <= Money::ZERO {
                return Err(DomainError::validation(format!(
                    "payment {idx}: amount must be positive"
                )));
            }
        }
        Ok(())
    }

    /// Distinct products referenced by the request, ascending (the lock order).
    pub fn product_ids(&self) -> Vec<ProductId> {
        let mut ids: Vec<ProductId> = self.items.iter().map(|l| l.product_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn amount_tendered(&self) -> DomainResult<Money> {
        Money::try_sum(self.payments.iter().map(|p| p.amount), "amount tendered")
    }
}

/// A sale line priced against the catalog at sale time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub product_id: ProductId,
    pub sku: String,
    pub product_name: String,
    pub unit_price: Money,
    pub tax_rate_bps: u32,
    pub quantity: i64,
    /// `quantity × unit_price`.
    pub gross: Money,
    pub line_discount: Money,
    pub line_tax: Money,
    /// `quantity × unit_price − line_discount + line_tax`.
    pub line_total: Money,
}

/// All lines of a sale plus header totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedSale {
    pub lines: Vec<PricedLine>,
    pub subtotal: Money,
    pub discount_total: Money,
    pub tax_total: Money,
    pub total_amount: Money,
}

/// Price every line from current catalog state.
///
/// Tax is charged on the discounted line amount. Every product must be present in
/// `products` and active; nothing here mutates state.
pub fn price_sale(
    request: &CreateTransaction,
    products: &BTreeMap<ProductId, Product>,
    default_tax_rate_bps: u32,
) -> DomainResult<PricedSale> {
    let mut lines = Vec::with_capacity(request.items.len());

    for (idx, item) in request.items.iter().enumerate() {
        let product = products
            .get(&item.product_id)
            .ok_or_else(|| DomainError::not_found("product", item.product_id))?;
        product.ensure_active()?;

        let gross = product.base_price.checked_mul(item.quantity).ok_or_else(|| {
            DomainError::validation(format!("item {idx}: line amount overflows"))
        })?;
        let line_discount = item.discount.unwrap_or(Money::ZERO);
        if line_discount > gross {
            return Err(DomainError::validation(format!(
                "item {idx}: discount {line_discount} exceeds line amount {gross}"
            )));
        }

        let tax_rate_bps = product.effective_tax_rate_bps(default_tax_rate_bps);
        let net = gross.try_sub(line_discount, "line amount")?;
        let line_tax = net.apply_rate_bps(tax_rate_bps);
        let line_total = net.try_add(line_tax, "line total")?;

        lines.push(PricedLine {
            product_id: product.id,
            sku: product.sku.clone(),
            product_name: product.name.clone(),
            unit_price: product.base_price,
            tax_rate_bps,
            quantity: item.quantity,
            gross,
            line_discount,
            line_tax,
            line_total,
        });
    }

    let subtotal = Money::try_sum(lines.iter().map(|l| l.gross), "subtotal")?;
    let discount_total = Money::try_sum(lines.iter().map(|l| l.line_discount), "discount total")?;
    let tax_total = Money::try_sum(lines.iter().map(|l| l.line_tax), "tax total")?;
    let total_amount = subtotal
        .try_sub(discount_total, "total amount")?
        .try_add(tax_total, "total amount")?;

    Ok(PricedSale {
        total_amount,
        lines,
        subtotal,
        discount_total,
        tax_total,
    })
}

impl PricedSale {
    /// Payments must cover the total.
    pub fn ensure_covered_by(&self, tendered: Money) -> DomainResult<()> {
        if tendered < self.total_amount {
            return Err(DomainError::InsufficientPayment {
                total: self.total_amount,
                paid: tendered,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use tillpoint_products::NewProduct;

    fn product(price: i64, tax_rate_bps: Option<u32>) -> Product {
        let input = NewProduct {
            sku: format!("SKU-{price}"),
            name: format!("Item {price}"),
            vendor_id: None,
            base_price: Money::from_minor(price),
            unit_cost: Money::ZERO,
            tax_rate_bps,
            reorder_level: 0,
            reorder_quantity: 0,
            opening_quantity: 0,
        };
        Product::register(ProductId::new(), &input, Utc::now()).unwrap()
    }

    fn catalog(products: &[Product]) -> BTreeMap<ProductId, Product> {
        products.iter().map(|p| (p.id, p.clone())).collect()
    }

    fn cash(amount: i64) -> PaymentRequest {
        PaymentRequest {
            method: PaymentMethod::Cash,
            amount: Money::from_minor(amount),
            details: serde_json::Value::Null,
        }
    }

    fn line(product: &Product, quantity: i64, discount: Option<i64>) -> SaleLineRequest {
        SaleLineRequest {
            product_id: product.id,
            quantity,
            discount: discount.map(Money::from_minor),
        }
    }

    #[test]
    fn prices_lines_with_discount_then_tax() {
        let coffee = product(1_000, Some(1_000));
        let request = CreateTransaction {
            items: vec![line(&coffee, 3, Some(500))],
            payments: vec![cash(3_000)],
            notes: None,
        };
        let priced = price_sale(&request, &catalog(&[coffee]), 0).unwrap();
        let l = &priced.lines[0];
        assert_eq!(l.gross, Money::from_minor(3_000));
        assert_eq!(l.line_discount, Money::from_minor(500));
        assert_eq!(l.line_tax, Money::from_minor(250));
        assert_eq!(l.line_total, Money::from_minor(2_750));
        assert_eq!(priced.subtotal, Money::from_minor(3_000));
        assert_eq!(priced.total_amount, Money::from_minor(2_750));
    }

    #[test]
    fn default_tax_rate_applies_without_override() {
        let mug = product(2_000, None);
        let request = CreateTransaction {
            items: vec![line(&mug, 1, None)],
            payments: vec![cash(5_000)],
            notes: None,
        };
        let priced = price_sale(&request, &catalog(&[mug]), 825).unwrap();
        assert_eq!(priced.tax_total, Money::from_minor(165));
        assert_eq!(priced.lines[0].tax_rate_bps, 825);
    }

    #[test]
    fn discount_larger_than_line_is_rejected() {
        let mug = product(100, None);
        let request = CreateTransaction {
            items: vec![line(&mug, 1, Some(101))],
            payments: vec![cash(100)],
            notes: None,
        };
        assert!(matches!(
            price_sale(&request, &catalog(&[mug]), 0),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn unknown_product_is_not_found() {
        let mug = product(100, None);
        let request = CreateTransaction {
            items: vec![line(&mug, 1, None)],
            payments: vec![cash(100)],
            notes: None,
        };
        let err = price_sale(&request, &BTreeMap::new(), 0).unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "product", .. }));
    }

    #[test]
    fn validate_rejects_empty_items_and_payments() {
        let mug = product(100, None);
        let empty_items = CreateTransaction {
            items: vec![],
            payments: vec![cash(100)],
            notes: None,
        };
        assert!(empty_items.validate().is_err());

        let no_payments = CreateTransaction {
            items: vec![line(&mug, 1, None)],
            payments: vec![],
            notes: None,
        };
        assert!(no_payments.validate().is_err());

        let zero_qty = CreateTransaction {
            items: vec![line(&mug, 0, None)],
            payments: vec![cash(100)],
            notes: None,
        };
        assert!(zero_qty.validate().is_err());
    }

    #[test]
    fn short_payment_is_insufficient() {
        let mug = product(1_000, None);
        let request = CreateTransaction {
            items: vec![line(&mug, 2, None)],
            payments: vec![cash(1_500)],
            notes: None,
        };
        let priced = price_sale(&request, &catalog(&[mug]), 0).unwrap();
        let err = priced.ensure_covered_by(request.amount_tendered().unwrap()).unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientPayment {
                total: Money::from_minor(2_000),
                paid: Money::from_minor(1_500),
            }
        );
    }

    #[test]
    fn product_ids_are_distinct_and_sorted() {
        let a = product(100, None);
        let b = product(200, None);
        let request = CreateTransaction {
            items: vec![line(&b, 1, None), line(&a, 1, None), line(&b, 2, None)],
            payments: vec![cash(1_000)],
            notes: None,
        };
        let ids = request.product_ids();
        assert_eq!(ids.len(), 2);
        assert!(ids[0] < ids[1]);
    }

    #[test]
    fn tendered_amount_overflow_is_rejected() {
        let mug = product(100, None);
        let request = CreateTransaction {
            items: vec![line(&mug, 1, None)],
            payments: vec![cash(i64::MAX), cash(i64::MAX)],
            notes: None,
        };
        assert!(request.validate().is_ok());
        assert!(matches!(request.amount_tendered(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn extreme_quantities_and_prices_are_rejected_not_wrapped() {
        let mug = product(2, None);
        let request = CreateTransaction {
            items: vec![line(&mug, i64::MAX, None)],
            payments: vec![cash(1)],
            notes: None,
        };
        assert!(matches!(
            price_sale(&request, &catalog(&[mug]), 0),
            Err(DomainError::Validation(_))
        ));

        let big = product(i64::MAX, None);
        let request = CreateTransaction {
            items: vec![line(&big, 1, None), line(&big, 1, None)],
            payments: vec![cash(1)],
            notes: None,
        };
        assert!(matches!(
            price_sale(&request, &catalog(&[big]), 0),
            Err(DomainError::Validation(_))
        ));

        let taxed = product(i64::MAX, Some(1_000));
        let request = CreateTransaction {
            items: vec![line(&taxed, 1, None)],
            payments: vec![cash(1)],
            notes: None,
        };
        assert!(matches!(
            price_sale(&request, &catalog(&[taxed]), 0),
            Err(DomainError::Validation(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: header totals always equal the sum of line totals.
        #[test]
        fn header_total_matches_lines(
            specs in prop::collection::vec((1i64..10_000, 1i64..20, 0u32..2_500), 1..8)
        ) {
            let products: Vec<Product> = specs.iter().map(|(price, _, bps)| product(*price, Some(*bps))).collect();
            let request = CreateTransaction {
                items: products.iter().zip(&specs).map(|(p, (_, qty, _))| line(p, *qty, None)).collect(),
                payments: vec![cash(1)],
                notes: None,
            };
            let priced = price_sale(&request, &catalog(&products), 0).unwrap();
            let line_sum = Money::try_sum(priced.lines.iter().map(|l| l.line_total), "lines").unwrap();
            prop_assert_eq!(priced.total_amount, line_sum);
        }
    }
}
