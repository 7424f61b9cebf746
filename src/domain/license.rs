use super::allocation::AllocationKey;
use super::history::ExpiryChange;
use super::ids::{CompanyId, LicenseId, ProductType};
use super::time::Timestamp;
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};

/// Site and contact details of a license. None of these fields affect quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteContact {
    pub dealer_company: String,
    pub country: String,
    pub hospital: String,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub hardware_info: Option<String>,
    pub detector_serial: Option<String>,
}

impl SiteContact {
    pub fn validate(&self) -> Result<()> {
        require("dealer_company", &self.dealer_company)?;
        require("country", &self.country)?;
        require("hospital", &self.hospital)
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(LedgerError::ValidationError(format!(
            "missing required field: {field}"
        )))
    } else {
        Ok(())
    }
}

/// Everything needed to issue a new license.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseGrant {
    pub company: CompanyId,
    pub product_type: ProductType,
    pub site: SiteContact,
    pub unique_code: String,
    pub activate_start: Timestamp,
    pub terminate: Timestamp,
}

impl LicenseGrant {
    pub fn validate(&self) -> Result<()> {
        require("product_type", self.product_type.as_str())?;
        self.site.validate()?;
        require("unique_code", &self.unique_code)?;
        if self.terminate < self.activate_start {
            return Err(LedgerError::ValidationError(
                "termination date precedes activation start".to_string(),
            ));
        }
        Ok(())
    }

    pub fn allocation_key(&self) -> AllocationKey {
        AllocationKey::new(self.company, self.product_type.clone())
    }
}

/// A request to move a license's termination date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Renewal {
    pub terminate: Timestamp,
    pub unique_code: String,
    pub updated_at: Timestamp,
}

/// One issued license grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct License {
    pub id: LicenseId,
    pub company: CompanyId,
    pub product_type: ProductType,
    pub site: SiteContact,
    pub unique_code: String,
    pub activate_start: Timestamp,
    pub terminate: Timestamp,
    pub activate_count: u32,
    pub deleted: bool,
    pub updated_at: Option<Timestamp>,
}

impl License {
    pub fn from_grant(id: LicenseId, grant: LicenseGrant) -> Self {
        Self {
            id,
            company: grant.company,
            product_type: grant.product_type,
            site: grant.site,
            unique_code: grant.unique_code,
            activate_start: grant.activate_start,
            terminate: grant.terminate,
            activate_count: 1,
            deleted: false,
            updated_at: None,
        }
    }

    pub fn allocation_key(&self) -> AllocationKey {
        AllocationKey::new(self.company, self.product_type.clone())
    }

    /// Whether this row consumes a unit of the given allocation.
    pub fn counts_toward(&self, key: &AllocationKey) -> bool {
        !self.deleted && self.company == key.company && self.product_type == key.product_type
    }

    /// Extends (or shortens) the subscription window.
    ///
    /// Returns the expiry change to be recorded. Fails with `NoOp` when the new
    /// termination instant equals the stored one.
    pub fn renew(&mut self, renewal: Renewal) -> Result<ExpiryChange> {
        if self.deleted {
            return Err(LedgerError::ValidationError(format!(
                "license {} has been withdrawn and cannot be renewed",
                self.id
            )));
        }
        require("unique_code", &renewal.unique_code)?;
        if renewal.terminate.utc() == self.terminate.utc() {
            return Err(LedgerError::NoOp(
                "termination date is unchanged".to_string(),
            ));
        }

        let change = ExpiryChange {
            previous: self.terminate.utc(),
            new: renewal.terminate.utc(),
            unique_code: renewal.unique_code.clone(),
        };
        self.terminate = renewal.terminate;
        self.unique_code = renewal.unique_code;
        self.updated_at = Some(renewal.updated_at);
        self.activate_count += 1;
        Ok(change)
    }

    /// Soft-deletes the license.
    pub fn withdraw(&mut self) -> Result<()> {
        if self.deleted {
            return Err(LedgerError::AlreadyWithdrawn(self.id));
        }
        self.activate_count = self.activate_count.checked_sub(1).ok_or_else(|| {
            LedgerError::ValidationError(format!(
                "license {} has no activation to withdraw",
                self.id
            ))
        })?;
        self.deleted = true;
        Ok(())
    }

    /// Replaces the site/contact fields.
    pub fn edit_site(&mut self, site: SiteContact) -> Result<()> {
        site.validate()?;
        if self.site == site {
            return Err(LedgerError::NoOp("license fields are unchanged".to_string()));
        }
        self.site = site;
        Ok(())
    }
}
