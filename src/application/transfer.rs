use super::history::HistoryRecorder;
use super::{ensure_company, ensure_product};
use crate::domain::allocation::{AllocationKey, QuotaAllocation, QuotaChange};
use crate::domain::command::TransferRequest;
use crate::domain::history::{Description, NewHistoryEntry};
use crate::domain::ids::HistoryId;
use crate::domain::ports::{Admin, LedgerStoreRef, MasterDataRef};
use crate::error::{LedgerError, Result};

/// Updated allocations on both sides of a committed transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferReceipt {
    pub entry: HistoryId,
    pub source: QuotaAllocation,
    pub target: QuotaAllocation,
}

/// Moves quota between companies and reverses such moves.
#[derive(Clone)]
pub struct TransferCoordinator {
    store: LedgerStoreRef,
    master_data: MasterDataRef,
    history: HistoryRecorder,
}

impl TransferCoordinator {
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

    /// Moves `units` of headroom from the source allocation to the target.
    pub async fn transfer(
        &self,
        admin: &Admin,
        request: TransferRequest,
    ) -> Result<TransferReceipt> {
        if request.units == 0 {
            return Err(LedgerError::ValidationError(
                "transfer units must be positive".to_string(),
            ));
        }
        if request.source == request.target {
            return Err(LedgerError::ValidationError(
                "source and target companies must differ".to_string(),
            ));
        }
        ensure_company(self.master_data.as_ref(), request.source).await?;
        ensure_company(self.master_data.as_ref(), request.target).await?;
        ensure_product(self.master_data.as_ref(), &request.product_type).await?;

        let source_key = AllocationKey::new(request.source, request.product_type.clone());
        let target_key = AllocationKey::new(request.target, request.product_type);
        let units = i64::from(request.units);

        let mut uow = self.store.begin().await?;
        let source = uow
            .allocation(&source_key)
            .await?
            .apply(QuotaChange::Capacity(-units))?;
        let target_before = uow.allocation(&target_key).await?;
        let target = target_before.apply(QuotaChange::Capacity(units))?;

        uow.set_capacity(&source_key, source.license_cnt).await?;
        uow.set_capacity(&target_key, target.license_cnt).await?;
        let entry = self
            .history
            .append(
                uow.as_mut(),
                NewHistoryEntry::transferred(request.source, &target_before, &target, admin.id),
            )
            .await?;
        uow.commit().await?;

        tracing::info!(
            entry = %entry.id,
            source = %source_key,
            target = %target_key,
            units,
            admin = %admin.id,
            "Quota transferred"
        );
        Ok(TransferReceipt {
            entry: entry.id,
            source,
            target,
        })
    }

    /// Undoes a transfer once, provided the target still has the units to give back.
    pub async fn reverse(&self, admin: &Admin, id: HistoryId) -> Result<()> {
        let mut uow = self.store.begin().await?;
        let original = uow
            .history_entry(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("history entry", id))?;
        if original.description != Description::Transfer || !original.is_allocation_scoped() {
            return Err(LedgerError::ValidationError(format!(
                "history entry {id} is not a transfer"
            )));
        }
        if original.canceled {
            return Err(LedgerError::AlreadyCanceled(id));
        }
        let (Some(source), Some(target)) = (original.source, original.target) else {
            return Err(LedgerError::InternalError(
                format!("transfer entry {id} has no source or target").into(),
            ));
        };

        let source_key = AllocationKey::new(source, original.product_type.clone());
        let target_key = AllocationKey::new(target, original.product_type.clone());
        let units = i64::from(original.units());

        let target_before = uow.allocation(&target_key).await?;
        let target_after = target_before
            .apply(QuotaChange::Capacity(-units))
            .map_err(|_| {
                LedgerError::ValidationError(
                    "cannot reverse: would drop usage below allocation".to_string(),
                )
            })?;
        let source_after = uow
            .allocation(&source_key)
            .await?
            .apply(QuotaChange::Capacity(units))?;

        uow.set_capacity(&target_key, target_after.license_cnt).await?;
        uow.set_capacity(&source_key, source_after.license_cnt).await?;
        self.history.mark_canceled(uow.as_mut(), id).await?;
        let reversal = self
            .history
            .append(
                uow.as_mut(),
                NewHistoryEntry::transfer_canceled(
                    &original,
                    &target_before,
                    &target_after,
                    admin.id,
                ),
            )
            .await?;
        uow.commit().await?;

        tracing::info!(
            entry = %id,
            reversal = %reversal.id,
            source = %source_key,
            target = %target_key,
            units,
            admin = %admin.id,
            "Transfer reversed"
        );
        Ok(())
    }
}
