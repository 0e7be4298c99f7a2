use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use tillpoint_core::{
    DomainError, DomainResult, Entity, Money, PoLineItemId, ProductId, PurchaseOrderId, UserId,
    VendorId,
};

/// Purchase order status lifecycle.
///
/// ```text
/// draft ─submit─▶ submitted ─approve─▶ approved ─receive─▶ partially_received ─receive─▶ received ─close─▶ closed
///                                          └──────────────receive (all)──────────────────▶ received
/// {draft, submitted, approved, partially_received} ─cancel─▶ cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Draft,
    Submitted,
    Approved,
    PartiallyReceived,
    Received,
    Closed,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "draft",
            PurchaseOrderStatus::Submitted => "submitted",
            PurchaseOrderStatus::Approved => "approved",
            PurchaseOrderStatus::PartiallyReceived => "partially_received",
            PurchaseOrderStatus::Received => "received",
            PurchaseOrderStatus::Closed => "closed",
            PurchaseOrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PurchaseOrderStatus::Closed | PurchaseOrderStatus::Cancelled)
    }

    pub fn can_receive(self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::Approved | PurchaseOrderStatus::PartiallyReceived
        )
    }

    pub fn can_cancel(self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::Draft
                | PurchaseOrderStatus::Submitted
                | PurchaseOrderStatus::Approved
                | PurchaseOrderStatus::PartiallyReceived
        )
    }
}

impl core::fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for PurchaseOrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PurchaseOrderStatus::Draft),
            "submitted" => Ok(PurchaseOrderStatus::Submitted),
            "approved" => Ok(PurchaseOrderStatus::Approved),
            "partially_received" => Ok(PurchaseOrderStatus::PartiallyReceived),
            "received" => Ok(PurchaseOrderStatus::Received),
            "closed" => Ok(PurchaseOrderStatus::Closed),
            "cancelled" => Ok(PurchaseOrderStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown purchase order status: {other}"
            ))),
        }
    }
}

/// Requested line on a purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoLineInput {
    pub product_id: ProductId,
    pub quantity_ordered: i64,
    pub unit_cost: Money,
}

impl PoLineInput {
    fn validate(&self) -> DomainResult<()> {
        if self.quantity_ordered <= 0 {
            return Err(DomainError::validation("quantity_ordered must be positive"));
        }
        if self.unit_cost.is_negative() {
            return Err(DomainError::validation("unit_cost cannot be negative"));
        }
        Ok(())
    }
}

/// Header-level amounts added to (or, for `discount`, taken off) the line subtotal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoCharges {
    pub tax: Money,
    pub shipping: Money,
    pub other_charges: Money,
    pub discount: Money,
}

impl PoCharges {
    fn validate(&self) -> DomainResult<()> {
        for (name, amount) in [
            ("tax", self.tax),
            ("shipping", self.shipping),
            ("other_charges", self.other_charges),
            ("discount", self.discount),
        ] {
            if amount.is_negative() {
                return Err(DomainError::validation(format!("{name} cannot be negative")));
            }
        }
        Ok(())
    }
}

/// Request: create a draft purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub vendor_id: VendorId,
    #[serde(default)]
    pub lines: Vec<PoLineInput>,
    #[serde(default)]
    pub charges: PoCharges,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Edit applied to a draft purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PoDraftEdit {
    AddLine(PoLineInput),
    UpdateLine {
        line_item_id: PoLineItemId,
        quantity_ordered: Option<i64>,
        unit_cost: Option<Money>,
    },
    RemoveLine {
        line_item_id: PoLineItemId,
    },
    SetCharges(PoCharges),
    SetVendor {
        vendor_id: VendorId,
    },
    SetNotes {
        notes: Option<String>,
    },
}

/// One line of a receiving call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub line_item_id: PoLineItemId,
    pub quantity_received: i64,
}

/// A receipt checked against the order, ready to be credited to stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedReceipt {
    pub line_item_id: PoLineItemId,
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Purchase order line.
///
/// Invariant: `0 <= quantity_received <= quantity_ordered`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoLineItem {
    pub id: PoLineItemId,
    pub purchase_order_id: PurchaseOrderId,
    pub product_id: ProductId,
    pub quantity_ordered: i64,
    pub quantity_received: i64,
    pub unit_cost: Money,
    pub line_total: Money,
}

impl PoLineItem {
    pub fn remaining(&self) -> i64 {
        self.quantity_ordered - self.quantity_received
    }

    pub fn is_fully_received(&self) -> bool {
        self.quantity_received == self.quantity_ordered
    }

    fn recompute(&mut self) -> DomainResult<()> {
        self.line_total = self
            .unit_cost
            .checked_mul(self.quantity_ordered)
            .ok_or_else(|| DomainError::validation("line total overflows"))?;
        Ok(())
    }
}

/// Purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: PurchaseOrderId,
    /// `PO-YYYYMMDD-####`.
    pub number: String,
    pub vendor_id: VendorId,
    pub status: PurchaseOrderStatus,
    pub lines: Vec<PoLineItem>,
    pub subtotal: Money,
    pub charges: PoCharges,
    pub total_amount: Money,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<UserId>,
    pub last_received_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
}

impl PurchaseOrder {
    /// Build a new draft. Lines are optional while drafting.
    pub fn draft(
        id: PurchaseOrderId,
        number: String,
        request: &CreatePurchaseOrder,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        request.charges.validate()?;

        let mut order = Self {
            id,
            number,
            vendor_id: request.vendor_id,
            status: PurchaseOrderStatus::Draft,
            lines: Vec::with_capacity(request.lines.len()),
            subtotal: Money::ZERO,
            charges: request.charges,
            total_amount: Money::ZERO,
            notes: clean_notes(request.notes.as_deref()),
            created_by,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            approved_at: None,
            approved_by: None,
            last_received_at: None,
            closed_at: None,
            cancelled_at: None,
            cancel_reason: None,
        };

        for line in &request.lines {
            order.push_line(line)?;
        }
        order.recompute_totals()?;
        Ok(order)
    }

    pub fn line(&self, line_item_id: PoLineItemId) -> Option<&PoLineItem> {
        self.lines.iter().find(|l| l.id == line_item_id)
    }

    pub fn is_fully_received(&self) -> bool {
        !self.lines.is_empty() && self.lines.iter().all(PoLineItem::is_fully_received)
    }

    fn ensure_status(&self, allowed: bool, action: &'static str) -> DomainResult<()> {
        if !allowed {
            return Err(DomainError::invalid_transition("purchase order", self.status, action));
        }
        Ok(())
    }

    fn push_line(&mut self, input: &PoLineInput) -> DomainResult<()> {
        input.validate()?;
        if self.lines.iter().any(|l| l.product_id == input.product_id) {
            return Err(DomainError::validation(format!(
                "product {} is already on this purchase order",
                input.product_id
            )));
        }
        let mut line = PoLineItem {
            id: PoLineItemId::new(),
            purchase_order_id: self.id,
            product_id: input.product_id,
            quantity_ordered: input.quantity_ordered,
            quantity_received: 0,
            unit_cost: input.unit_cost,
            line_total: Money::ZERO,
        };
        line.recompute()?;
        self.lines.push(line);
        Ok(())
    }

    fn recompute_totals(&mut self) -> DomainResult<()> {
        let subtotal = Money::try_sum(self.lines.iter().map(|l| l.line_total), "purchase order subtotal")?;
        let charges = &self.charges;
        let total = Money::try_sum(
            [subtotal, charges.tax, charges.shipping, charges.other_charges],
            "purchase order total",
        )?
        .try_sub(charges.discount, "purchase order total")?;
        self.subtotal = subtotal;
        self.total_amount = total;
        Ok(())
    }

    /// Apply a draft edit. Only legal while the order is a draft; a rejected edit
    /// leaves the order untouched.
    pub fn apply_edit(&mut self, edit: &PoDraftEdit, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_status(self.status == PurchaseOrderStatus::Draft, "edit")?;

        let mut next = self.clone();
        next.edit_draft(edit)?;
        next.recompute_totals()?;
        next.updated_at = now;
        *self = next;
        Ok(())
    }

    fn edit_draft(&mut self, edit: &PoDraftEdit) -> DomainResult<()> {
        match edit {
            PoDraftEdit::AddLine(input) => self.push_line(input)?,
            PoDraftEdit::UpdateLine {
                line_item_id,
                quantity_ordered,
                unit_cost,
            } => {
                let line = self
                    .lines
                    .iter_mut()
                    .find(|l| l.id == *line_item_id)
                    .ok_or_else(|| DomainError::not_found("purchase order line", line_item_id))?;
                let updated = PoLineInput {
                    product_id: line.product_id,
                    quantity_ordered: quantity_ordered.unwrap_or(line.quantity_ordered),
                    unit_cost: unit_cost.unwrap_or(line.unit_cost),
                };
                updated.validate()?;
                let mut candidate = line.clone();
                candidate.quantity_ordered = updated.quantity_ordered;
                candidate.unit_cost = updated.unit_cost;
                candidate.recompute()?;
                *line = candidate;
            }
            PoDraftEdit::RemoveLine { line_item_id } => {
                let before = self.lines.len();
                self.lines.retain(|l| l.id != *line_item_id);
                if self.lines.len() == before {
                    return Err(DomainError::not_found("purchase order line", line_item_id));
                }
            }
            PoDraftEdit::SetCharges(charges) => {
                charges.validate()?;
                self.charges = *charges;
            }
            PoDraftEdit::SetVendor { vendor_id } => self.vendor_id = *vendor_id,
            PoDraftEdit::SetNotes { notes } => self.notes = clean_notes(notes.as_deref()),
        }
        Ok(())
    }

    /// `draft → submitted`.
    pub fn submit(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_status(self.status == PurchaseOrderStatus::Draft, "submit")?;
        if self.lines.is_empty() {
            return Err(DomainError::validation(
                "cannot submit purchase order without lines",
            ));
        }
        self.status = PurchaseOrderStatus::Submitted;
        self.submitted_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `submitted → approved`, recording the approver.
    pub fn approve(&mut self, approver: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_status(self.status == PurchaseOrderStatus::Submitted, "approve")?;
        self.status = PurchaseOrderStatus::Approved;
        self.approved_at = Some(now);
        self.approved_by = Some(approver);
        self.updated_at = now;
        Ok(())
    }

    /// Check a receiving call against the order without changing it.
    ///
    /// Receipts for the same line within one call are summed. Any line that
    /// would exceed its ordered quantity rejects the whole call.
    pub fn plan_receipt(&self, receipts: &[ReceiptLine]) -> DomainResult<Vec<PlannedReceipt>> {
        self.ensure_status(self.status.can_receive(), "receive")?;
        if receipts.is_empty() {
            return Err(DomainError::validation("receipt must contain at least one line"));
        }

        let mut planned: Vec<PlannedReceipt> = Vec::new();
        for receipt in receipts {
            if receipt.quantity_received <= 0 {
                return Err(DomainError::validation(format!(
                    "line {}: quantity_received must be positive",
                    receipt.line_item_id
                )));
            }
            let line = self.line(receipt.line_item_id).ok_or_else(|| {
                DomainError::not_found("purchase order line", receipt.line_item_id)
            })?;

            // A saturated sum still exceeds every line's remaining quantity.
            match planned.iter_mut().find(|p| p.line_item_id == line.id) {
                Some(existing) => {
                    existing.quantity = existing.quantity.saturating_add(receipt.quantity_received)
                }
                None => planned.push(PlannedReceipt {
                    line_item_id: line.id,
                    product_id: line.product_id,
                    quantity: receipt.quantity_received,
                }),
            }
        }

        for p in &planned {
            // Line existence was checked above.
            let Some(line) = self.line(p.line_item_id) else {
                continue;
            };
            if p.quantity > line.remaining() {
                return Err(over_receive(line, p.quantity));
            }
        }

        Ok(planned)
    }

    /// Credit planned receipts to the lines and move to `partially_received` or `received`.
    pub fn apply_receipt(&mut self, planned: &[PlannedReceipt], now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_status(self.status.can_receive(), "receive")?;
        let mut lines = self.lines.clone();
        for p in planned {
            let line = lines
                .iter_mut()
                .find(|l| l.id == p.line_item_id)
                .ok_or_else(|| DomainError::not_found("purchase order line", p.line_item_id))?;
            if p.quantity > line.remaining() {
                return Err(over_receive(line, p.quantity));
            }
            line.quantity_received += p.quantity;
        }
        self.lines = lines;

        self.status = if self.is_fully_received() {
            PurchaseOrderStatus::Received
        } else {
            PurchaseOrderStatus::PartiallyReceived
        };
        self.last_received_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `received → closed`.
    pub fn close(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_status(self.status == PurchaseOrderStatus::Received, "close")?;
        self.status = PurchaseOrderStatus::Closed;
        self.closed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Cancel from any pre-`received` status. Stock already received stays on hand.
    pub fn cancel(&mut self, reason: &str, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_status(self.status.can_cancel(), "cancel")?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("cancel reason cannot be empty"));
        }
        self.status = PurchaseOrderStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.cancel_reason = Some(reason.to_string());
        self.updated_at = now;
        Ok(())
    }
}

impl Entity for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

fn over_receive(line: &PoLineItem, attempted: i64) -> DomainError {
    DomainError::OverReceive {
        line_item_id: line.id,
        ordered: line.quantity_ordered,
        already_received: line.quantity_received,
        attempted,
    }
}

fn clean_notes(notes: Option<&str>) -> Option<String> {
    notes.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string)
}

pub fn format_po_number(date: NaiveDate, sequence: i64) -> String {
    format!("PO-{}-{sequence:04}", date.format("%Y%m%d"))
}
