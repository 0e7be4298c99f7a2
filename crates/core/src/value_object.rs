//! Value object trait: equality by value, not identity.
//!
//! Value objects are domain objects that have **no identity** - they are defined entirely
//! by their attribute values. Two value objects with the same values are considered equal.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one, build
/// a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// Amount of money in the smallest currency unit (e.g., cents).
///
/// The engine is single-currency; amounts are signed so that intermediate values
/// such as `paid - total` can be represented, but persisted prices and totals are
/// validated to be non-negative.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Multiply by a unit count. `None` on overflow.
    pub fn checked_mul(self, quantity: i64) -> Option<Money> {
        self.0.checked_mul(quantity).map(Money)
    }

    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.0.checked_sub(rhs.0).map(Money)
    }

    /// `self + rhs`, or a validation error naming `what` on overflow.
    pub fn try_add(self, rhs: Money, what: &str) -> DomainResult<Money> {
        self.checked_add(rhs).ok_or_else(|| DomainError::amount_out_of_range(what))
    }

    /// `self - rhs`, or a validation error naming `what` on overflow.
    pub fn try_sub(self, rhs: Money, what: &str) -> DomainResult<Money> {
        self.checked_sub(rhs).ok_or_else(|| DomainError::amount_out_of_range(what))
    }

    /// Sum of `amounts`, or a validation error naming `what` on overflow.
    pub fn try_sum<I>(amounts: I, what: &str) -> DomainResult<Money>
    where
        I: IntoIterator<Item = Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, amount| acc.try_add(amount, what))
    }

    /// Apply a rate expressed in basis points, rounding half away from zero.
    ///
    /// `Money(1999).apply_rate_bps(825)` is 165 (164.9175 rounded).
    pub fn apply_rate_bps(self, rate_bps: u32) -> Money {
        let product = self.0 as i128 * rate_bps as i128;
        let half = if product >= 0 { 5_000 } else { -5_000 };
        Money(((product + half) / 10_000) as i64)
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}
