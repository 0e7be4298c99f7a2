use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tillpoint_core::{
    DomainError, DomainResult, Entity, Money, PaymentId, ProductId, TransactionId,
    TransactionItemId, UserId,
};

use crate::pricing::{PaymentRequest, PricedSale};

/// Transaction status lifecycle: `completed → voided`, terminal once voided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Completed,
    Voided,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
            TransactionStatus::Voided => "voided",
        }
    }
}

impl core::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TransactionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(TransactionStatus::Completed),
            "voided" => Ok(TransactionStatus::Voided),
            other => Err(DomainError::validation(format!("unknown transaction status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    GiftCard,
    Other,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::GiftCard => "gift_card",
            PaymentMethod::Other => "other",
        }
    }
}

impl core::str::FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            "gift_card" => Ok(PaymentMethod::GiftCard),
            "other" => Ok(PaymentMethod::Other),
            other => Err(DomainError::validation(format!("unknown payment method: {other}"))),
        }
    }
}

/// Sold line with a snapshot of catalog data at sale time. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionItem {
    pub id: TransactionItemId,
    pub transaction_id: TransactionId,
    pub product_id: ProductId,
    pub sku: String,
    pub product_name: String,
    pub unit_price: Money,
    pub tax_rate_bps: u32,
    pub quantity: i64,
    pub line_discount: Money,
    pub line_tax: Money,
    pub line_total: Money,
}

/// Recorded payment. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub transaction_id: TransactionId,
    pub method: PaymentMethod,
    pub amount: Money,
    pub details: serde_json::Value,
}

/// Sales transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// `TXN-######`.
    pub number: String,
    pub status: TransactionStatus,
    pub cashier_id: UserId,
    pub items: Vec<TransactionItem>,
    pub payments: Vec<Payment>,
    pub subtotal: Money,
    pub discount_total: Money,
    pub tax_total: Money,
    pub total_amount: Money,
    pub amount_paid: Money,
    /// `amount_paid − total_amount`; non-zero when cash is over-tendered.
    pub change_due: Money,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub voided_at: Option<DateTime<Utc>>,
    pub voided_by: Option<UserId>,
    pub void_reason: Option<String>,
}

impl Transaction {
    /// Assemble a completed transaction from a priced sale and its payments.
    pub fn complete(
        id: TransactionId,
        number: String,
        priced: PricedSale,
        payments: &[PaymentRequest],
        cashier_id: UserId,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let amount_paid = Money::try_sum(payments.iter().map(|p| p.amount), "amount paid")?;
        priced.ensure_covered_by(amount_paid)?;
        let change_due = amount_paid.try_sub(priced.total_amount, "change due")?;

        let items = priced
            .lines
            .into_iter()
            .map(|l| TransactionItem {
                id: TransactionItemId::new(),
                transaction_id: id,
                product_id: l.product_id,
                sku: l.sku,
                product_name: l.product_name,
                unit_price: l.unit_price,
                tax_rate_bps: l.tax_rate_bps,
                quantity: l.quantity,
                line_discount: l.line_discount,
                line_tax: l.line_tax,
                line_total: l.line_total,
            })
            .collect();

        let payments = payments
            .iter()
            .map(|p| Payment {
                id: PaymentId::new(),
                transaction_id: id,
                method: p.method,
                amount: p.amount,
                details: p.details.clone(),
            })
            .collect();

        Ok(Self {
            id,
            number,
            status: TransactionStatus::Completed,
            cashier_id,
            items,
            payments,
            subtotal: priced.subtotal,
            discount_total: priced.discount_total,
            tax_total: priced.tax_total,
            total_amount: priced.total_amount,
            amount_paid,
            change_due,
            notes: notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            created_at: now,
            voided_at: None,
            voided_by: None,
            void_reason: None,
        })
    }

    pub fn ensure_voidable(&self) -> DomainResult<()> {
        if self.status != TransactionStatus::Completed {
            return Err(DomainError::invalid_transition("transaction", self.status, "void"));
        }
        Ok(())
    }

    /// `completed → voided`. There is no way back.
    pub fn void(&mut self, reason: &str, actor_id: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_voidable()?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("void reason cannot be empty"));
        }
        self.status = TransactionStatus::Voided;
        self.voided_at = Some(now);
        self.voided_by = Some(actor_id);
        self.void_reason = Some(reason.to_string());
        Ok(())
    }

    /// Per-product quantity sold, in item order. Used to restore stock on void.
    pub fn sold_quantities(&self) -> impl Iterator<Item = (ProductId, i64)> + '_ {
        self.items.iter().map(|i| (i.product_id, i.quantity))
    }
}

impl Entity for Transaction {
    type Id = TransactionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

pub fn format_transaction_number(sequence: i64) -> String {
    format!("TXN-{sequence:06}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::PricedLine;

    fn priced(total: i64) -> PricedSale {
        PricedSale {
            lines: vec![PricedLine {
                product_id: ProductId::new(),
                sku: "SKU-1".to_string(),
                product_name: "Widget".to_string(),
                unit_price: Money::from_minor(total),
                tax_rate_bps: 0,
                quantity: 1,
                gross: Money::from_minor(total),
                line_discount: Money::ZERO,
                line_tax: Money::ZERO,
                line_total: Money::from_minor(total),
            }],
            subtotal: Money::from_minor(total),
            discount_total: Money::ZERO,
            tax_total: Money::ZERO,
            total_amount: Money::from_minor(total),
        }
    }

    fn cash(amount: i64) -> PaymentRequest {
        PaymentRequest {
            method: PaymentMethod::Cash,
            amount: Money::from_minor(amount),
            details: serde_json::json!({ "tendered": amount }),
        }
    }

    fn completed(total: i64, paid: i64) -> Transaction {
        Transaction::complete(
            TransactionId::new(),
            format_transaction_number(1),
            priced(total),
            &[cash(paid)],
            UserId::new(),
            None,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn complete_records_change_due() {
        let txn = completed(1_250, 2_000);
        assert_eq!(txn.status, TransactionStatus::Completed);
        assert_eq!(txn.amount_paid, Money::from_minor(2_000));
        assert_eq!(txn.change_due, Money::from_minor(750));
        assert_eq!(txn.number, "TXN-000001");
        assert!(txn.items.iter().all(|i| i.transaction_id == txn.id));
        assert!(txn.payments.iter().all(|p| p.transaction_id == txn.id));
    }

    #[test]
    fn complete_rejects_short_payment() {
        let err = Transaction::complete(
            TransactionId::new(),
            format_transaction_number(1),
            priced(1_000),
            &[cash(999)],
            UserId::new(),
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InsufficientPayment { .. }));
    }

    #[test]
    fn complete_rejects_payments_that_overflow() {
        let err = Transaction::complete(
            TransactionId::new(),
            format_transaction_number(1),
            priced(1_000),
            &[cash(i64::MAX), cash(i64::MAX)],
            UserId::new(),
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn void_is_irreversible() {
        let mut txn = completed(1_000, 1_000);
        let actor = UserId::new();
        txn.void("customer changed mind", actor, Utc::now()).unwrap();
        assert_eq!(txn.status, TransactionStatus::Voided);
        assert_eq!(txn.voided_by, Some(actor));
        assert_eq!(txn.void_reason.as_deref(), Some("customer changed mind"));

        let err = txn.void("again", actor, Utc::now()).unwrap_err();
        assert_eq!(
            err,
            DomainError::invalid_transition("transaction", "voided", "void")
        );
    }

    #[test]
    fn void_requires_reason() {
        let mut txn = completed(1_000, 1_000);
        assert!(txn.void("  ", UserId::new(), Utc::now()).is_err());
        assert_eq!(txn.status, TransactionStatus::Completed);
    }

    #[test]
    fn number_is_zero_padded_to_six_digits() {
        assert_eq!(format_transaction_number(42), "TXN-000042");
        assert_eq!(format_transaction_number(1_234_567), "TXN-1234567");
    }
}
