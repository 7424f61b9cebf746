use super::history::{HistoryRecorder, Reconciliation};
use super::issuance::QuotaIssuer;
use super::subscription::SubscriptionManager;
use super::transfer::{TransferCoordinator, TransferReceipt};
use crate::domain::allocation::QuotaAllocation;
use crate::domain::command::Command;
use crate::domain::history::Description;
use crate::domain::ids::{HistoryId, LicenseId};
use crate::domain::ports::{Admin, LedgerStoreRef, MasterDataRef};
use crate::error::{LedgerError, Result};

/// Result of a successfully executed [`Command`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Granted(LicenseId),
    Renewed,
    Edited,
    Withdrawn,
    Issued(HistoryId),
    Transferred(TransferReceipt),
    Reversed,
}

/// The main entry point of the ledger.
///
/// `LicenseLedger` owns the store and master data ports and hands them to the
/// components that implement each operation. It is cheap to share behind an `Arc`.
pub struct LicenseLedger {
    store: LedgerStoreRef,
    subscriptions: SubscriptionManager,
    transfers: TransferCoordinator,
    issuer: QuotaIssuer,
    history: HistoryRecorder,
}

impl LicenseLedger {
    pub fn new(store: LedgerStoreRef, master_data: MasterDataRef) -> Self {
        let history = HistoryRecorder::new(store.clone());
        Self {
            subscriptions: SubscriptionManager::new(
                store.clone(),
                master_data.clone(),
                history.clone(),
            ),
            transfers: TransferCoordinator::new(
                store.clone(),
                master_data.clone(),
                history.clone(),
            ),
            issuer: QuotaIssuer::new(store.clone(), master_data, history.clone()),
            history,
            store,
        }
    }

    pub fn store(&self) -> &LedgerStoreRef {
        &self.store
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn transfers(&self) -> &TransferCoordinator {
        &self.transfers
    }

    pub fn issuer(&self) -> &QuotaIssuer {
        &self.issuer
    }

    pub fn history(&self) -> &HistoryRecorder {
        &self.history
    }

    pub async fn execute(&self, admin: &Admin, command: Command) -> Result<Outcome> {
        tracing::debug!(command = command.name(), admin = %admin.id, "Executing command");
        match command {
            Command::Grant(grant) => self
                .subscriptions
                .grant(admin, grant)
                .await
                .map(Outcome::Granted),
            Command::Renew { license, renewal } => {
                self.subscriptions.renew(admin, license, renewal).await?;
                Ok(Outcome::Renewed)
            }
            Command::Edit { license, site } => {
                self.subscriptions.edit(admin, license, site).await?;
                Ok(Outcome::Edited)
            }
            Command::Withdraw { license } => {
                self.subscriptions.withdraw(admin, license).await?;
                Ok(Outcome::Withdrawn)
            }
            Command::Issue { key, units } => {
                self.issuer.issue(admin, key, units).await.map(Outcome::Issued)
            }
            Command::Transfer(request) => self
                .transfers
                .transfer(admin, request)
                .await
                .map(Outcome::Transferred),
            Command::Reverse { entry } => {
                self.reverse(admin, entry).await?;
                Ok(Outcome::Reversed)
            }
        }
    }

    /// Reverses a transfer or cancels a quota issuance, depending on the entry.
    pub async fn reverse(&self, admin: &Admin, entry: HistoryId) -> Result<()> {
        let original = self
            .store
            .history_entry(entry)
            .await?
            .ok_or_else(|| LedgerError::not_found("history entry", entry))?;
        match original.description {
            Description::Transfer if original.is_allocation_scoped() => {
                self.transfers.reverse(admin, entry).await
            }
            Description::Generated if original.is_allocation_scoped() => {
                self.issuer.cancel(admin, entry).await
            }
            description => Err(LedgerError::ValidationError(format!(
                "history entry {entry} ({description}) cannot be reversed"
            ))),
        }
    }

    /// Live allocation of every key with quota or licenses, sorted by key.
    pub async fn allocations(&self) -> Result<Vec<QuotaAllocation>> {
        Ok(self.store.snapshot().await?.allocations())
    }

    /// Reconciles every known allocation against its history trail.
    ///
    /// Cached counts and trails come from a single snapshot, so writes racing the
    /// audit never show up as drift.
    pub async fn audit(&self) -> Result<Vec<Reconciliation>> {
        let snapshot = self.store.snapshot().await?;
        let reconciliations = snapshot
            .allocations()
            .into_iter()
            .map(|allocation| self.history.reconcile_in(&snapshot, allocation))
            .collect::<Result<Vec<_>>>()?;
        let drifted = reconciliations.iter().filter(|r| !r.is_consistent()).count();
        tracing::info!(
            allocations = reconciliations.len(),
            drifted,
            "Ledger audit finished"
        );
        Ok(reconciliations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fixtures::{admin, ledger};
    use crate::domain::allocation::AllocationKey;
    use crate::domain::command::TransferRequest;
    use crate::domain::ids::{CompanyId, ProductType};
    use crate::domain::license::tests::grant;

    fn chest(company: u32) -> AllocationKey {
        AllocationKey::new(CompanyId(company), ProductType::from("Chest"))
    }

    #[tokio::test]
    async fn test_execute_dispatches_commands() {
        let ledger = ledger();
        let admin = admin();

        let issued = ledger
            .execute(&admin, Command::Issue { key: chest(1), units: 3 })
            .await
            .unwrap();
        assert_eq!(issued, Outcome::Issued(HistoryId(1)));

        let granted = ledger.execute(&admin, Command::Grant(grant(1, "Chest"))).await.unwrap();
        assert_eq!(granted, Outcome::Granted(LicenseId(1)));

        let outcome = ledger
            .execute(
                &admin,
                Command::Transfer(TransferRequest {
                    source: CompanyId(1),
                    target: CompanyId(3),
                    product_type: ProductType::from("Chest"),
                    units: 1,
                }),
            )
            .await
            .unwrap();
        let Outcome::Transferred(receipt) = outcome else {
            panic!("expected a transfer receipt");
        };
        assert_eq!(receipt.source.headroom(), 1);

        let withdrawn = ledger
            .execute(&admin, Command::Withdraw { license: LicenseId(1) })
            .await
            .unwrap();
        assert_eq!(withdrawn, Outcome::Withdrawn);
    }

    #[tokio::test]
    async fn test_reverse_dispatch_by_description() {
        let ledger = ledger();
        let admin = admin();
        let issued = ledger.issuer().issue(&admin, chest(1), 4).await.unwrap();
        let license = ledger.subscriptions().grant(&admin, grant(1, "Chest")).await.unwrap();
        let license_entry = ledger
            .history()
            .list_by_license(license)
            .await
            .unwrap()
            .into_vec()[0]
            .id;

        assert!(matches!(
            ledger.reverse(&admin, license_entry).await,
            Err(LedgerError::ValidationError(_))
        ));
        // Three of four units are unused, so the whole issuance cannot go.
        assert!(matches!(
            ledger.reverse(&admin, issued).await,
            Err(LedgerError::ValidationError(_))
        ));

        ledger.subscriptions().withdraw(&admin, license).await.unwrap();
        assert_eq!(
            ledger.execute(&admin, Command::Reverse { entry: issued }).await.unwrap(),
            Outcome::Reversed
        );
        assert_eq!(ledger.allocations().await.unwrap()[0].license_cnt, 0);
    }

    #[tokio::test]
    async fn test_allocations_and_audit_agree() {
        let ledger = ledger();
        let admin = admin();
        ledger.issuer().issue(&admin, chest(2), 2).await.unwrap();
        ledger.issuer().issue(&admin, chest(1), 3).await.unwrap();
        ledger.subscriptions().grant(&admin, grant(1, "Chest")).await.unwrap();

        let allocations = ledger.allocations().await.unwrap();
        let keys: Vec<_> = allocations.iter().map(|a| a.key.clone()).collect();
        assert_eq!(keys, vec![chest(1), chest(2)]);
        assert_eq!((allocations[0].license_cnt, allocations[0].use_cnt), (3, 1));

        let audit = ledger.audit().await.unwrap();
        assert_eq!(audit.len(), 2);
        assert!(audit.iter().all(Reconciliation::is_consistent));
    }
}
