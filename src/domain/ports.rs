use super::allocation::{AllocationKey, QuotaAllocation};
use super::history::{HistoryEntry, NewHistoryEntry};
use super::ids::{AdminId, CompanyId, HistoryId, LicenseId, ProductType};
use super::license::{License, LicenseGrant};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Durable storage for licenses, cached capacities and the history trail.
///
/// Reads on the store itself see committed state only. Every mutation goes through
/// a [`UnitOfWork`] obtained from [`LedgerStore::begin`].
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Opens a unit of work holding the store's write lock.
    ///
    /// Fails with `Timeout` if the lock cannot be acquired within the configured bound.
    async fn begin(&self) -> Result<UnitOfWorkBox>;

    async fn license(&self, id: LicenseId) -> Result<Option<License>>;
    async fn licenses(&self) -> Result<Vec<License>>;
    async fn history(&self) -> Result<Vec<HistoryEntry>>;
    /// Cached `license_cnt` for every allocation the store has seen.
    async fn capacities(&self) -> Result<Vec<(AllocationKey, u32)>>;
    /// Licenses, capacities and history read as one committed state.
    ///
    /// No unit of work can commit between the three reads.
    async fn snapshot(&self) -> Result<LedgerSnapshot>;

    async fn history_entry(&self, id: HistoryId) -> Result<Option<HistoryEntry>> {
        Ok(self.history().await?.into_iter().find(|e| e.id == id))
    }
}

/// A point-in-time view of everything committed to a [`LedgerStore`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerSnapshot {
    pub licenses: Vec<License>,
    pub capacities: Vec<(AllocationKey, u32)>,
    pub history: Vec<HistoryEntry>,
}

impl LedgerSnapshot {
    /// Cached allocation for `key`, empty if the store has never seen it.
    pub fn allocation(&self, key: &AllocationKey) -> QuotaAllocation {
        let license_cnt = self
            .capacities
            .iter()
            .find_map(|(k, cnt)| (k == key).then_some(*cnt))
            .unwrap_or(0);
        let use_cnt = self
            .licenses
            .iter()
            .filter(|l| l.counts_toward(key))
            .count() as u32;
        QuotaAllocation {
            key: key.clone(),
            license_cnt,
            use_cnt,
        }
    }

    /// Every allocation with quota or licenses, sorted by key.
    pub fn allocations(&self) -> Vec<QuotaAllocation> {
        let mut allocations: BTreeMap<AllocationKey, QuotaAllocation> = BTreeMap::new();
        for (key, license_cnt) in &self.capacities {
            allocations.insert(
                key.clone(),
                QuotaAllocation {
                    key: key.clone(),
                    license_cnt: *license_cnt,
                    use_cnt: 0,
                },
            );
        }
        for license in &self.licenses {
            let key = license.allocation_key();
            let allocation = allocations
                .entry(key.clone())
                .or_insert_with(|| QuotaAllocation::empty(key));
            if !license.deleted {
                allocation.use_cnt += 1;
            }
        }
        allocations.into_values().collect()
    }

    /// Entries touching `key`, oldest first (ties by id).
    pub fn trail(&self, key: &AllocationKey) -> Vec<&HistoryEntry> {
        let mut entries: Vec<&HistoryEntry> =
            self.history.iter().filter(|e| e.touches(key)).collect();
        entries.sort_by(|a, b| {
            a.recorded_at
                .cmp(&b.recorded_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        entries
    }
}

/// A single atomic read-modify-write against the store.
///
/// Writes are staged and become visible only on [`UnitOfWork::commit`]. Dropping an
/// uncommitted unit of work discards them.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn license(&mut self, id: LicenseId) -> Result<Option<License>>;
    /// Number of non-deleted licenses counting toward `key`.
    async fn usage(&mut self, key: &AllocationKey) -> Result<u32>;
    /// Cached granted units for `key` (zero if never set).
    async fn capacity(&mut self, key: &AllocationKey) -> Result<u32>;
    async fn history_entry(&mut self, id: HistoryId) -> Result<Option<HistoryEntry>>;

    async fn insert_license(&mut self, grant: LicenseGrant) -> Result<License>;
    async fn update_license(&mut self, license: License) -> Result<()>;
    async fn set_capacity(&mut self, key: &AllocationKey, license_cnt: u32) -> Result<()>;
    async fn append_history(&mut self, entry: NewHistoryEntry) -> Result<HistoryEntry>;
    async fn update_history(&mut self, entry: HistoryEntry) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn allocation(&mut self, key: &AllocationKey) -> Result<QuotaAllocation> {
        let license_cnt = self.capacity(key).await?;
        let use_cnt = self.usage(key).await?;
        Ok(QuotaAllocation {
            key: key.clone(),
            license_cnt,
            use_cnt,
        })
    }
}

/// Existence checks against company and product master data.
#[async_trait]
pub trait MasterData: Send + Sync {
    async fn company_exists(&self, id: CompanyId) -> Result<bool>;
    async fn product_exists(&self, product: &ProductType) -> Result<bool>;
}

/// The authenticated identity stamped onto every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admin {
    pub id: AdminId,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolves a credential to an admin, or fails with `Unauthorized`.
    async fn authenticate(&self, credential: &str) -> Result<Admin>;
}

pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type UnitOfWorkBox = Box<dyn UnitOfWork>;
pub type MasterDataRef = Arc<dyn MasterData>;
pub type AuthenticatorRef = Arc<dyn Authenticator>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::license::tests::grant;

    fn key(company: u32) -> AllocationKey {
        AllocationKey::new(CompanyId(company), ProductType::from("Chest"))
    }

    #[test]
    fn test_snapshot_allocations_count_live_licenses() {
        let mut withdrawn = License::from_grant(LicenseId(2), grant(1, "Chest"));
        withdrawn.withdraw().unwrap();
        let snapshot = LedgerSnapshot {
            licenses: vec![
                License::from_grant(LicenseId(1), grant(1, "Chest")),
                withdrawn,
                License::from_grant(LicenseId(3), grant(2, "Chest")),
            ],
            capacities: vec![(key(1), 3)],
            history: Vec::new(),
        };

        let allocations = snapshot.allocations();
        assert_eq!(allocations.len(), 2);
        assert_eq!((allocations[0].license_cnt, allocations[0].use_cnt), (3, 1));
        // Company 2 holds a license but was never issued quota.
        assert_eq!((allocations[1].license_cnt, allocations[1].use_cnt), (0, 1));
        assert_eq!(snapshot.allocation(&key(1)), allocations[0]);
        assert_eq!(snapshot.allocation(&key(3)), QuotaAllocation::empty(key(3)));
    }
}
