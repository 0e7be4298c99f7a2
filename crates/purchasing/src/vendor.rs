use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tillpoint_core::{DomainError, DomainResult, Entity, VendorId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVendor {
    pub name: String,
    #[serde(default)]
    pub contact_email: Option<String>,
}

/// Supplier that purchase orders are placed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vendor {
    pub id: VendorId,
    pub name: String,
    pub contact_email: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Vendor {
    pub fn register(id: VendorId, input: &NewVendor, now: DateTime<Utc>) -> DomainResult<Self> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("vendor name cannot be empty"));
        }
        Ok(Self {
            id,
            name: name.to_string(),
            contact_email: input
                .contact_email
                .as_ref()
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty()),
            is_active: true,
            created_at: now,
        })
    }

    pub fn ensure_active(&self) -> DomainResult<()> {
        if !self.is_active {
            return Err(DomainError::validation(format!("vendor {} is inactive", self.name)));
        }
        Ok(())
    }

    pub fn deactivate(&mut self) -> DomainResult<()> {
        self.ensure_active()?;
        self.is_active = false;
        Ok(())
    }
}

impl Entity for Vendor {
    type Id = VendorId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_requires_a_name() {
        let input = NewVendor {
            name: " ".to_string(),
            contact_email: None,
        };
        assert!(Vendor::register(VendorId::new(), &input, Utc::now()).is_err());
    }

    #[test]
    fn deactivated_vendor_fails_active_check() {
        let input = NewVendor {
            name: "Acme Roasters".to_string(),
            contact_email: Some(" orders@acme.test ".to_string()),
        };
        let mut vendor = Vendor::register(VendorId::new(), &input, Utc::now()).unwrap();
        assert_eq!(vendor.contact_email.as_deref(), Some("orders@acme.test"));
        vendor.deactivate().unwrap();
        assert!(vendor.ensure_active().is_err());
    }
}
