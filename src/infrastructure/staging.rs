use crate::domain::allocation::AllocationKey;
use crate::domain::history::{HistoryEntry, NewHistoryEntry};
use crate::domain::ids::{HistoryId, LicenseId};
use crate::domain::license::{License, LicenseGrant};
use std::collections::BTreeMap;

/// Writes buffered by a unit of work until commit.
///
/// Both backends read through the overlay first and fall back to committed state.
#[derive(Debug, Default)]
pub(crate) struct Staged {
    pub(crate) licenses: BTreeMap<LicenseId, License>,
    pub(crate) capacities: BTreeMap<AllocationKey, u32>,
    pub(crate) history: BTreeMap<HistoryId, HistoryEntry>,
    pub(crate) next_license: u64,
    pub(crate) next_history: u64,
}

impl Staged {
    pub(crate) fn new(next_license: u64, next_history: u64) -> Self {
        Self {
            next_license,
            next_history,
            ..Self::default()
        }
    }

    pub(crate) fn insert_license(&mut self, grant: LicenseGrant) -> License {
        self.next_license += 1;
        let license = License::from_grant(LicenseId(self.next_license), grant);
        self.licenses.insert(license.id, license.clone());
        license
    }

    pub(crate) fn append_history(&mut self, entry: NewHistoryEntry) -> HistoryEntry {
        self.next_history += 1;
        let entry = entry.into_entry(HistoryId(self.next_history));
        self.history.insert(entry.id, entry.clone());
        entry
    }

    /// Counts rows toward `key`, letting staged rows shadow committed ones.
    pub(crate) fn usage<'a>(
        &self,
        key: &AllocationKey,
        committed: impl IntoIterator<Item = &'a License>,
    ) -> u32 {
        let committed = committed
            .into_iter()
            .filter(|l| !self.licenses.contains_key(&l.id))
            .filter(|l| l.counts_toward(key))
            .count();
        let staged = self.licenses.values().filter(|l| l.counts_toward(key)).count();
        (committed + staged) as u32
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.licenses.is_empty() && self.capacities.is_empty() && self.history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::{CompanyId, ProductType};
    use crate::domain::license::tests::grant;

    #[test]
    fn test_staged_rows_shadow_committed_rows() {
        let key = AllocationKey::new(CompanyId(1), ProductType::from("Chest"));
        let committed = vec![
            License::from_grant(LicenseId(1), grant(1, "Chest")),
            License::from_grant(LicenseId(2), grant(1, "Chest")),
            License::from_grant(LicenseId(3), grant(2, "Chest")),
        ];

        let mut staged = Staged::new(3, 0);
        let mut withdrawn = committed[0].clone();
        withdrawn.withdraw().unwrap();
        staged.licenses.insert(withdrawn.id, withdrawn);
        let fresh = staged.insert_license(grant(1, "Chest"));

        assert_eq!(fresh.id, LicenseId(4));
        assert_eq!(staged.usage(&key, &committed), 2);
    }
}
