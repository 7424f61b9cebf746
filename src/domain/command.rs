use super::allocation::AllocationKey;
use super::ids::{CompanyId, HistoryId, LicenseId, ProductType};
use super::license::{LicenseGrant, Renewal, SiteContact};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub source: CompanyId,
    pub target: CompanyId,
    pub product_type: ProductType,
    pub units: u32,
}

/// One ledger operation as requested by a caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Grant(LicenseGrant),
    Renew { license: LicenseId, renewal: Renewal },
    Edit { license: LicenseId, site: SiteContact },
    Withdraw { license: LicenseId },
    Issue { key: AllocationKey, units: u32 },
    Transfer(TransferRequest),
    Reverse { entry: HistoryId },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Grant(_) => "grant",
            Command::Renew { .. } => "renew",
            Command::Edit { .. } => "edit",
            Command::Withdraw { .. } => "withdraw",
            Command::Issue { .. } => "issue",
            Command::Transfer(_) => "transfer",
            Command::Reverse { .. } => "reverse",
        }
    }
}
