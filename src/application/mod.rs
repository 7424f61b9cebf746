//! Application layer orchestrating the ledger's operations.
//!
//! Each component checks master data, then runs its read-check-write sequence inside a
//! single `UnitOfWork` so that the check and the write see the same state.
//! `LicenseLedger` wires the components together and dispatches `Command`s.

pub mod history;
pub mod issuance;
pub mod ledger;
pub mod subscription;
pub mod transfer;

use crate::domain::ids::{CompanyId, ProductType};
use crate::domain::ports::MasterData;
use crate::error::{LedgerError, Result};

pub(crate) async fn ensure_company(master_data: &dyn MasterData, id: CompanyId) -> Result<()> {
    if master_data.company_exists(id).await? {
        Ok(())
    } else {
        Err(LedgerError::not_found("company", id))
    }
}

pub(crate) async fn ensure_product(
    master_data: &dyn MasterData,
    product: &ProductType,
) -> Result<()> {
    if master_data.product_exists(product).await? {
        Ok(())
    } else {
        Err(LedgerError::not_found("product type", product))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::ledger::LicenseLedger;
    use crate::domain::ids::{AdminId, CompanyId, ProductType};
    use crate::domain::ports::Admin;
    use crate::infrastructure::in_memory::InMemoryLedgerStore;
    use crate::infrastructure::master_data::InMemoryMasterData;
    use std::sync::Arc;

    /// Companies 1..=3 and the `Chest` / `Bone Age` products.
    pub(crate) fn ledger() -> LicenseLedger {
        let master_data = InMemoryMasterData::new(
            [CompanyId(1), CompanyId(2), CompanyId(3)],
            [ProductType::from("Chest"), ProductType::from("Bone Age")],
        );
        LicenseLedger::new(Arc::new(InMemoryLedgerStore::new()), Arc::new(master_data))
    }

    pub(crate) fn admin() -> Admin {
        Admin { id: AdminId(1) }
    }
}
