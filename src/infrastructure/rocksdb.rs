use super::staging::Staged;
use crate::domain::allocation::AllocationKey;
use crate::domain::history::{HistoryEntry, NewHistoryEntry};
use crate::domain::ids::{CompanyId, HistoryId, LicenseId, ProductType};
use crate::domain::license::{License, LicenseGrant};
use crate::domain::ports::{LedgerSnapshot, LedgerStore, UnitOfWork, UnitOfWorkBox};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Column Family for license rows.
pub const CF_LICENSES: &str = "licenses";
/// Column Family for the history trail.
pub const CF_HISTORY: &str = "history";
/// Column Family for cached `license_cnt` per allocation.
pub const CF_ALLOCATIONS: &str = "allocations";
/// Column Family for identity sequences.
pub const CF_META: &str = "meta";

const KEY_LAST_LICENSE: &[u8] = b"last_license";
const KEY_LAST_HISTORY: &[u8] = b"last_history";

/// A persistent store implementation using RocksDB.
///
/// Licenses, history and allocation capacities live in separate Column Families.
/// A unit of work stages its writes and commits them as one `WriteBatch`, so either
/// every row of an operation lands or none does. Writers are serialized by an
/// in-process lock.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    writer: Arc<Mutex<()>>,
    tx_timeout: Duration,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_LICENSES, CF_HISTORY, CF_ALLOCATIONS, CF_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path.as_ref(), descriptors)?;
        tracing::info!("Opened RocksDB ledger at {:?}", path.as_ref());

        Ok(Self {
            db: Arc::new(db),
            writer: Arc::new(Mutex::new(())),
            tx_timeout: Duration::from_secs(5),
        })
    }

    pub fn with_timeout(mut self, tx_timeout: Duration) -> Self {
        self.tx_timeout = tx_timeout;
        self
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            LedgerError::InternalError(format!("{name} column family not found").into())
        })
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        let handle = self.cf(cf)?;
        match self.db.get_cf(handle, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_json<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let handle = self.cf(cf)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(handle, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn counter(&self, key: &[u8]) -> Result<u64> {
        Ok(self.get_json(CF_META, key)?.unwrap_or(0))
    }

    fn scan_capacities(&self) -> Result<Vec<(AllocationKey, u32)>> {
        let handle = self.cf(CF_ALLOCATIONS)?;
        let mut capacities = Vec::new();
        for item in self.db.iterator_cf(handle, IteratorMode::Start) {
            let (key, value) = item?;
            capacities.push((decode_allocation_key(&key)?, serde_json::from_slice(&value)?));
        }
        Ok(capacities)
    }

    fn write_staged(&self, staged: &Staged) -> Result<()> {
        let mut batch = WriteBatch::default();

        let licenses = self.cf(CF_LICENSES)?;
        for (id, license) in &staged.licenses {
            batch.put_cf(licenses, id.0.to_be_bytes(), to_json(license)?);
        }
        let allocations = self.cf(CF_ALLOCATIONS)?;
        for (key, license_cnt) in &staged.capacities {
            batch.put_cf(allocations, encode_allocation_key(key), to_json(license_cnt)?);
        }
        let history = self.cf(CF_HISTORY)?;
        for (id, entry) in &staged.history {
            batch.put_cf(history, id.0.to_be_bytes(), to_json(entry)?);
        }
        let meta = self.cf(CF_META)?;
        batch.put_cf(meta, KEY_LAST_LICENSE, to_json(&staged.next_license)?);
        batch.put_cf(meta, KEY_LAST_HISTORY, to_json(&staged.next_history)?);

        self.db.write(batch)?;
        Ok(())
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Company id (big-endian) followed by the product type bytes.
fn encode_allocation_key(key: &AllocationKey) -> Vec<u8> {
    let mut bytes = key.company.0.to_be_bytes().to_vec();
    bytes.extend_from_slice(key.product_type.as_str().as_bytes());
    bytes
}

fn decode_allocation_key(bytes: &[u8]) -> Result<AllocationKey> {
    let invalid = || LedgerError::InternalError("malformed allocation key".into());
    let (company, product) = bytes.split_at_checked(4).ok_or_else(invalid)?;
    let company = u32::from_be_bytes(company.try_into().map_err(|_| invalid())?);
    let product = std::str::from_utf8(product).map_err(|_| invalid())?;
    Ok(AllocationKey::new(CompanyId(company), ProductType::new(product)))
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn begin(&self) -> Result<UnitOfWorkBox> {
        let guard = tokio::time::timeout(self.tx_timeout, self.writer.clone().lock_owned())
            .await
            .map_err(|_| LedgerError::Timeout(self.tx_timeout))?;
        let staged = Staged::new(self.counter(KEY_LAST_LICENSE)?, self.counter(KEY_LAST_HISTORY)?);
        Ok(Box::new(RocksDBUnitOfWork {
            store: self.clone(),
            _guard: guard,
            staged,
        }))
    }

    async fn license(&self, id: LicenseId) -> Result<Option<License>> {
        self.get_json(CF_LICENSES, &id.0.to_be_bytes())
    }

    async fn licenses(&self) -> Result<Vec<License>> {
        self.scan_json(CF_LICENSES)
    }

    async fn history(&self) -> Result<Vec<HistoryEntry>> {
        self.scan_json(CF_HISTORY)
    }

    async fn history_entry(&self, id: HistoryId) -> Result<Option<HistoryEntry>> {
        self.get_json(CF_HISTORY, &id.0.to_be_bytes())
    }

    async fn capacities(&self) -> Result<Vec<(AllocationKey, u32)>> {
        self.scan_capacities()
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot> {
        // Commits happen under the writer lock, so holding it pins all three scans.
        let _guard = tokio::time::timeout(self.tx_timeout, self.writer.lock())
            .await
            .map_err(|_| LedgerError::Timeout(self.tx_timeout))?;
        Ok(LedgerSnapshot {
            licenses: self.scan_json(CF_LICENSES)?,
            capacities: self.scan_capacities()?,
            history: self.scan_json(CF_HISTORY)?,
        })
    }
}

struct RocksDBUnitOfWork {
    store: RocksDBStore,
    _guard: OwnedMutexGuard<()>,
    staged: Staged,
}

#[async_trait]
impl UnitOfWork for RocksDBUnitOfWork {
    async fn license(&mut self, id: LicenseId) -> Result<Option<License>> {
        if let Some(license) = self.staged.licenses.get(&id) {
            return Ok(Some(license.clone()));
        }
        self.store.get_json(CF_LICENSES, &id.0.to_be_bytes())
    }

    async fn usage(&mut self, key: &AllocationKey) -> Result<u32> {
        let committed: Vec<License> = self.store.scan_json(CF_LICENSES)?;
        Ok(self.staged.usage(key, &committed))
    }

    async fn capacity(&mut self, key: &AllocationKey) -> Result<u32> {
        if let Some(license_cnt) = self.staged.capacities.get(key) {
            return Ok(*license_cnt);
        }
        Ok(self
            .store
            .get_json(CF_ALLOCATIONS, &encode_allocation_key(key))?
            .unwrap_or(0))
    }

    async fn history_entry(&mut self, id: HistoryId) -> Result<Option<HistoryEntry>> {
        if let Some(entry) = self.staged.history.get(&id) {
            return Ok(Some(entry.clone()));
        }
        self.store.get_json(CF_HISTORY, &id.0.to_be_bytes())
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
        if self.staged.is_empty() {
            return Ok(());
        }
        self.store.write_staged(&self.staged)?;
        tracing::debug!(
            licenses = self.staged.licenses.len(),
            history = self.staged.history.len(),
            "RocksDB batch committed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::license::tests::grant;
    use tempfile::tempdir;

    fn chest(company: u32) -> AllocationKey {
        AllocationKey::new(CompanyId(company), ProductType::from("Chest"))
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        for cf in [CF_LICENSES, CF_HISTORY, CF_ALLOCATIONS, CF_META] {
            assert!(store.db.cf_handle(cf).is_some());
        }
    }

    #[tokio::test]
    async fn test_allocation_key_encoding() {
        let key = AllocationKey::new(CompanyId(258), ProductType::from("Bone Age"));
        assert_eq!(decode_allocation_key(&encode_allocation_key(&key)).unwrap(), key);
        assert!(decode_allocation_key(&[0, 1]).is_err());
    }

    #[tokio::test]
    async fn test_committed_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let license = {
            let store = RocksDBStore::open(dir.path()).unwrap();
            let mut uow = store.begin().await.unwrap();
            uow.set_capacity(&chest(1), 2).await.unwrap();
            let license = uow.insert_license(grant(1, "Chest")).await.unwrap();
            uow.commit().await.unwrap();
            license
        };

        let store = RocksDBStore::open(dir.path()).unwrap();
        assert_eq!(store.license(license.id).await.unwrap(), Some(license));
        assert_eq!(store.capacities().await.unwrap(), vec![(chest(1), 2)]);

        let mut uow = store.begin().await.unwrap();
        assert_eq!(uow.usage(&chest(1)).await.unwrap(), 1);
        let next = uow.insert_license(grant(1, "Chest")).await.unwrap();
        assert_eq!(next.id, LicenseId(2));
    }

    #[tokio::test]
    async fn test_uncommitted_batch_is_discarded() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        {
            let mut uow = store.begin().await.unwrap();
            uow.insert_license(grant(1, "Chest")).await.unwrap();
        }
        assert!(store.licenses().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_waits_for_writer() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path())
            .unwrap()
            .with_timeout(Duration::from_millis(20));
        let mut uow = store.begin().await.unwrap();
        uow.set_capacity(&chest(1), 2).await.unwrap();
        assert!(matches!(store.snapshot().await, Err(LedgerError::Timeout(_))));
        uow.commit().await.unwrap();

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.capacities, vec![(chest(1), 2)]);
        assert!(snapshot.licenses.is_empty());
    }
}
