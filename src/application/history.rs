use crate::domain::allocation::{AllocationKey, QuotaAllocation};
use crate::domain::history::{HistoryEntry, NewHistoryEntry, fold_allocation};
use crate::domain::ids::{HistoryId, LicenseId};
use crate::domain::ports::{LedgerSnapshot, LedgerStoreRef, UnitOfWork};
use crate::error::{LedgerError, Result};

/// History entries in reverse-chronological order (newest first, ties by id).
///
/// Iterating does not consume the trail, so it can be walked any number of times.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryTrail {
    entries: Vec<HistoryEntry>,
}

impl HistoryTrail {
    fn new(mut entries: Vec<HistoryEntry>) -> Self {
        entries.sort_by(|a, b| {
            b.recorded_at
                .cmp(&a.recorded_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Self { entries }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<HistoryEntry> {
        self.entries
    }
}

impl<'a> IntoIterator for &'a HistoryTrail {
    type Item = &'a HistoryEntry;
    type IntoIter = std::slice::Iter<'a, HistoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Cached allocation next to the one recomputed from the history trail.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub cached: QuotaAllocation,
    pub recomputed: QuotaAllocation,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.cached == self.recomputed
    }
}

/// Owns the append-only history trail and everything derived from it.
#[derive(Clone)]
pub struct HistoryRecorder {
    store: LedgerStoreRef,
}

impl HistoryRecorder {
    pub fn new(store: LedgerStoreRef) -> Self {
        Self { store }
    }

    /// Appends a write-once entry within `uow`. The store assigns the id.
    pub async fn append(
        &self,
        uow: &mut dyn UnitOfWork,
        entry: NewHistoryEntry,
    ) -> Result<HistoryEntry> {
        let entry = uow.append_history(entry).await?;
        tracing::debug!(
            entry = %entry.id,
            description = %entry.description,
            prev_cnt = entry.prev_cnt,
            new_cnt = entry.new_cnt,
            "History entry staged"
        );
        Ok(entry)
    }

    /// Flips `canceled` on an entry. Allowed exactly once per entry.
    pub async fn mark_canceled(
        &self,
        uow: &mut dyn UnitOfWork,
        id: HistoryId,
    ) -> Result<HistoryEntry> {
        let mut entry = uow
            .history_entry(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("history entry", id))?;
        entry.mark_canceled()?;
        uow.update_history(entry.clone()).await?;
        Ok(entry)
    }

    pub async fn list_by_license(&self, id: LicenseId) -> Result<HistoryTrail> {
        let entries = self.store.history().await?;
        Ok(HistoryTrail::new(
            entries.into_iter().filter(|e| e.license == Some(id)).collect(),
        ))
    }

    /// Includes transfers in which the allocation's company is the source.
    pub async fn list_by_allocation(&self, key: &AllocationKey) -> Result<HistoryTrail> {
        let entries = self.store.history().await?;
        Ok(HistoryTrail::new(
            entries.into_iter().filter(|e| e.touches(key)).collect(),
        ))
    }

    /// Recomputes an allocation from the history trail alone.
    pub async fn compute_allocation(&self, key: &AllocationKey) -> Result<QuotaAllocation> {
        let snapshot = self.store.snapshot().await?;
        fold_allocation(key, snapshot.trail(key))
    }

    /// Compares the cached allocation with its trail, both read from one snapshot.
    pub async fn reconcile(&self, key: &AllocationKey) -> Result<Reconciliation> {
        let snapshot = self.store.snapshot().await?;
        self.reconcile_in(&snapshot, snapshot.allocation(key))
    }

    pub(crate) fn reconcile_in(
        &self,
        snapshot: &LedgerSnapshot,
        cached: QuotaAllocation,
    ) -> Result<Reconciliation> {
        let recomputed = fold_allocation(&cached.key, snapshot.trail(&cached.key))?;
        let reconciliation = Reconciliation { cached, recomputed };
        if !reconciliation.is_consistent() {
            tracing::warn!(
                allocation = %reconciliation.cached.key,
                cached_license_cnt = reconciliation.cached.license_cnt,
                cached_use_cnt = reconciliation.cached.use_cnt,
                license_cnt = reconciliation.recomputed.license_cnt,
                use_cnt = reconciliation.recomputed.use_cnt,
                "Allocation drifted from its history trail"
            );
        }
        Ok(reconciliation)
    }
}
