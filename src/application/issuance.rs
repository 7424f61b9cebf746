use super::history::HistoryRecorder;
use super::{ensure_company, ensure_product};
use crate::domain::allocation::{AllocationKey, QuotaChange};
use crate::domain::history::{Description, NewHistoryEntry};
use crate::domain::ids::HistoryId;
use crate::domain::ports::{Admin, LedgerStoreRef, MasterDataRef};
use crate::error::{LedgerError, Result};

/// Adds quota to a company's allocation and cancels earlier issuances.
#[derive(Clone)]
pub struct QuotaIssuer {
    store: LedgerStoreRef,
    master_data: MasterDataRef,
    history: HistoryRecorder,
}

impl QuotaIssuer {
    pub fn new(
        store: LedgerStoreRef,
        master_data: MasterDataRef,
        history: HistoryRecorder,
    ) -> Self {
        Self {
            store,
            master_data,
            history,
        }
    }

    pub async fn issue(&self, admin: &Admin, key: AllocationKey, units: u32) -> Result<HistoryId> {
        if units == 0 {
            return Err(LedgerError::ValidationError(
                "issued units must be positive".to_string(),
            ));
        }
        ensure_company(self.master_data.as_ref(), key.company).await?;
        ensure_product(self.master_data.as_ref(), &key.product_type).await?;

        let mut uow = self.store.begin().await?;
        let before = uow.allocation(&key).await?;
        let after = before.apply(QuotaChange::Capacity(i64::from(units)))?;
        uow.set_capacity(&key, after.license_cnt).await?;
        let entry = self
            .history
            .append(uow.as_mut(), NewHistoryEntry::quota_issued(&before, &after, admin.id))
            .await?;
        uow.commit().await?;

        tracing::info!(
            entry = %entry.id,
            allocation = %key,
            units,
            license_cnt = after.license_cnt,
            admin = %admin.id,
            "Quota issued"
        );
        Ok(entry.id)
    }

    /// Cancels an issuance, as long as the allocation still has the units unused.
    pub async fn cancel(&self, admin: &Admin, id: HistoryId) -> Result<()> {
        let mut uow = self.store.begin().await?;
        let original = uow
            .history_entry(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("history entry", id))?;
        if original.description != Description::Generated || !original.is_allocation_scoped() {
            return Err(LedgerError::ValidationError(format!(
                "history entry {id} is not a quota issuance"
            )));
        }
        if original.canceled {
            return Err(LedgerError::AlreadyCanceled(id));
        }

        let key = AllocationKey::new(original.company, original.product_type.clone());
        let before = uow.allocation(&key).await?;
        let after = before
            .apply(QuotaChange::Capacity(-i64::from(original.units())))
            .map_err(|_| {
                LedgerError::ValidationError(format!(
                    "cannot cancel {} units: only {} unused in {key}",
                    original.units(),
                    before.headroom()
                ))
            })?;

        uow.set_capacity(&key, after.license_cnt).await?;
        self.history.mark_canceled(uow.as_mut(), id).await?;
        self.history
            .append(
                uow.as_mut(),
                NewHistoryEntry::issuance_canceled(&original, &before, &after, admin.id),
            )
            .await?;
        uow.commit().await?;

        tracing::info!(
            entry = %id,
            allocation = %key,
            admin = %admin.id,
            "Quota issuance canceled"
        );
        Ok(())
    }
}
