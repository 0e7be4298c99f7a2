//! Strongly-typed identifiers used across the domain.
//!
//! Every persisted entity gets its own newtype so a product id can never be passed
//! where a purchase order id is expected. Ids are UUIDv7, which makes them
//! time-ordered; the `Ord` impl is what gives multi-row operations a stable lock order.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

macro_rules! define_ids {
    ($($(#[$meta:meta])* $name:ident => $label:literal;)+) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(Uuid);

            impl $name {
                /// Fresh time-ordered id.
                pub fn new() -> Self {
                    Self(Uuid::now_v7())
                }

                pub fn from_uuid(uuid: Uuid) -> Self {
                    Self(uuid)
                }

                pub fn as_uuid(&self) -> &Uuid {
                    &self.0
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    fmt::Display::fmt(&self.0, f)
                }
            }

            impl From<Uuid> for $name {
                fn from(uuid: Uuid) -> Self {
                    Self(uuid)
                }
            }

            impl From<$name> for Uuid {
                fn from(id: $name) -> Uuid {
                    id.0
                }
            }

            impl FromStr for $name {
                type Err = DomainError;

                fn from_str(raw: &str) -> Result<Self, Self::Err> {
                    Uuid::parse_str(raw.trim())
                        .map(Self)
                        .map_err(|e| DomainError::validation(format!("malformed {} `{raw}`: {e}", $label)))
                }
            }
        )+
    };
}

define_ids! {
    /// Actor recorded on audit rows and documents.
    UserId => "user id";
    ProductId => "product id";
    VendorId => "vendor id";
    /// A completed (or voided) sale.
    TransactionId => "transaction id";
    TransactionItemId => "transaction item id";
    PaymentId => "payment id";
    PurchaseOrderId => "purchase order id";
    PoLineItemId => "purchase order line id";
    /// One row of the inventory audit trail.
    AdjustmentId => "adjustment id";
}
