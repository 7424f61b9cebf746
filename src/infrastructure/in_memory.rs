use super::staging::Staged;
use crate::domain::allocation::AllocationKey;
use crate::domain::history::{HistoryEntry, NewHistoryEntry};
use crate::domain::ids::{HistoryId, LicenseId};
use crate::domain::license::{License, LicenseGrant};
use crate::domain::ports::{LedgerSnapshot, LedgerStore, UnitOfWork, UnitOfWorkBox};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};

const DEFAULT_TX_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct LedgerState {
    licenses: BTreeMap<LicenseId, License>,
    capacities: BTreeMap<AllocationKey, u32>,
    history: BTreeMap<HistoryId, HistoryEntry>,
    last_license: u64,
    last_history: u64,
}

impl LedgerState {
    fn capacities(&self) -> Vec<(AllocationKey, u32)> {
        self.capacities
            .iter()
            .map(|(key, cnt)| (key.clone(), *cnt))
            .collect()
    }
}

/// A thread-safe in-memory ledger store.
///
/// Uses `Arc<Mutex<LedgerState>>`: a unit of work owns the lock for its whole
/// lifetime, which serializes writers. Reads wait on the same lock under the same
/// timeout. Ideal for tests and one-shot runs.
#[derive(Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
    tx_timeout: Duration,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_TX_TIMEOUT)
    }
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(tx_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
            tx_timeout,
        }
    }

    /// Takes the state lock for a read, bounded like a writer's.
    async fn read(&self) -> Result<MutexGuard<'_, LedgerState>> {
        tokio::time::timeout(self.tx_timeout, self.state.lock())
            .await
            .map_err(|_| LedgerError::Timeout(self.tx_timeout))
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<UnitOfWorkBox> {
        let guard = tokio::time::timeout(self.tx_timeout, self.state.clone().lock_owned())
            .await
            .map_err(|_| LedgerError::Timeout(self.tx_timeout))?;
        let staged = Staged::new(guard.last_license, guard.last_history);
        Ok(Box::new(InMemoryUnitOfWork { guard, staged }))
    }

    async fn license(&self, id: LicenseId) -> Result<Option<License>> {
        let state = self.read().await?;
        Ok(state.licenses.get(&id).cloned())
    }

    async fn licenses(&self) -> Result<Vec<License>> {
        let state = self.read().await?;
        Ok(state.licenses.values().cloned().collect())
    }

    async fn history(&self) -> Result<Vec<HistoryEntry>> {
        let state = self.read().await?;
        Ok(state.history.values().cloned().collect())
    }

    async fn history_entry(&self, id: HistoryId) -> Result<Option<HistoryEntry>> {
        let state = self.read().await?;
        Ok(state.history.get(&id).cloned())
    }

    async fn capacities(&self) -> Result<Vec<(AllocationKey, u32)>> {
        let state = self.read().await?;
        Ok(state.capacities())
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot> {
        let state = self.read().await?;
        Ok(LedgerSnapshot {
            licenses: state.licenses.values().cloned().collect(),
            capacities: state.capacities(),
            history: state.history.values().cloned().collect(),
        })
    }
}

struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<LedgerState>,
    staged: Staged,
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn license(&mut self, id: LicenseId) -> Result<Option<License>> {
        Ok(self
            .staged
            .licenses
            .get(&id)
            .or_else(|| self.guard.licenses.get(&id))
            .cloned())
    }

    async fn usage(&mut self, key: &AllocationKey) -> Result<u32> {
        Ok(self.staged.usage(key, self.guard.licenses.values()))
    }

    async fn capacity(&mut self, key: &AllocationKey) -> Result<u32> {
        Ok(self
            .staged
            .capacities
            .get(key)
            .or_else(|| self.guard.capacities.get(key))
            .copied()
            .unwrap_or(0))
    }

    async fn history_entry(&mut self, id: HistoryId) -> Result<Option<HistoryEntry>> {
        Ok(self
            .staged
            .history
            .get(&id)
            .or_else(|| self.guard.history.get(&id))
            .cloned())
    }

    async fn insert_license(&mut self, grant: LicenseGrant) -> Result<License> {
        Ok(self.staged.insert_license(grant))
    }

    async fn update_license(&mut self, license: License) -> Result<()> {
        self.staged.licenses.insert(license.id, license);
        Ok(())
    }

    async fn set_capacity(&mut self, key: &AllocationKey, license_cnt: u32) -> Result<()> {
        self.staged.capacities.insert(key.clone(), license_cnt);
        Ok(())
    }

    async fn append_history(&mut self, entry: NewHistoryEntry) -> Result<HistoryEntry> {
        Ok(self.staged.append_history(entry))
    }

    async fn update_history(&mut self, entry: HistoryEntry) -> Result<()> {
        self.staged.history.insert(entry.id, entry);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryUnitOfWork { mut guard, staged } = *self;
        if staged.is_empty() {
            return Ok(());
        }
        guard.last_license = staged.next_license;
        guard.last_history = staged.next_history;
        guard.licenses.extend(staged.licenses);
        guard.capacities.extend(staged.capacities);
        guard.history.extend(staged.history);
        tracing::debug!(
            licenses = guard.licenses.len(),
            history = guard.history.len(),
            "In-memory unit of work committed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::{CompanyId, ProductType};
    use crate::domain::license::tests::grant;

    fn chest(company: u32) -> AllocationKey {
        AllocationKey::new(CompanyId(company), ProductType::from("Chest"))
    }

    #[tokio::test]
    async fn test_commit_publishes_staged_writes() {
        let store = InMemoryLedgerStore::new();
        let mut uow = store.begin().await.unwrap();
        let license = uow.insert_license(grant(1, "Chest")).await.unwrap();
        uow.set_capacity(&chest(1), 3).await.unwrap();
        assert_eq!(uow.usage(&chest(1)).await.unwrap(), 1);
        uow.commit().await.unwrap();

        let stored = store.license(license.id).await.unwrap().unwrap();
        assert_eq!(stored, license);
        assert_eq!(store.capacities().await.unwrap(), vec![(chest(1), 3)]);
    }

    #[tokio::test]
    async fn test_drop_without_commit_rolls_back() {
        let store = InMemoryLedgerStore::new();
        {
            let mut uow = store.begin().await.unwrap();
            uow.insert_license(grant(1, "Chest")).await.unwrap();
            uow.set_capacity(&chest(1), 3).await.unwrap();
        }
        assert!(store.licenses().await.unwrap().is_empty());
        assert!(store.capacities().await.unwrap().is_empty());

        // Identities handed out by the abandoned unit of work are reused.
        let mut uow = store.begin().await.unwrap();
        let license = uow.insert_license(grant(1, "Chest")).await.unwrap();
        assert_eq!(license.id, LicenseId(1));
    }

    #[tokio::test]
    async fn test_second_writer_times_out() {
        let store = InMemoryLedgerStore::with_timeout(Duration::from_millis(20));
        let _held = store.begin().await.unwrap();
        let result = store.begin().await;
        assert!(matches!(result, Err(LedgerError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_reads_behind_held_writer_time_out() {
        let store = InMemoryLedgerStore::with_timeout(Duration::from_millis(20));
        let held = store.begin().await.unwrap();
        assert!(matches!(store.licenses().await, Err(LedgerError::Timeout(_))));
        assert!(matches!(store.snapshot().await, Err(LedgerError::Timeout(_))));
        assert!(matches!(
            store.history_entry(HistoryId(1)).await,
            Err(LedgerError::Timeout(_))
        ));
        drop(held);

        assert!(store.licenses().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_sees_one_commit() {
        let store = InMemoryLedgerStore::new();
        let mut uow = store.begin().await.unwrap();
        uow.set_capacity(&chest(1), 2).await.unwrap();
        uow.insert_license(grant(1, "Chest")).await.unwrap();
        uow.commit().await.unwrap();

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.capacities, vec![(chest(1), 2)]);
        assert_eq!(snapshot.licenses.len(), 1);
        assert!(snapshot.history.is_empty());
    }
}
