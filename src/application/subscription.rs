use super::history::HistoryRecorder;
use super::{ensure_company, ensure_product};
use crate::domain::allocation::QuotaChange;
use crate::domain::history::NewHistoryEntry;
use crate::domain::ids::{CompanyId, LicenseId, ProductType};
use crate::domain::license::{License, LicenseGrant, Renewal, SiteContact};
use crate::domain::ports::{Admin, LedgerStoreRef, MasterDataRef};
use crate::error::{LedgerError, Result};

/// Lifecycle of individual licenses: grant, renew, withdraw and edit.
#[derive(Clone)]
pub struct SubscriptionManager {
    store: LedgerStoreRef,
    master_data: MasterDataRef,
    history: HistoryRecorder,
}

impl SubscriptionManager {
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

    /// Issues a new license, consuming one unit of the allocation's headroom.
    pub async fn grant(&self, admin: &Admin, grant: LicenseGrant) -> Result<LicenseId> {
        grant.validate()?;
        ensure_company(self.master_data.as_ref(), grant.company).await?;
        ensure_product(self.master_data.as_ref(), &grant.product_type).await?;

        let key = grant.allocation_key();
        let mut uow = self.store.begin().await?;
        let after = uow.allocation(&key).await?.apply(QuotaChange::Usage(1))?;
        let license = uow.insert_license(grant).await?;
        self.history
            .append(uow.as_mut(), NewHistoryEntry::license_granted(&license, admin.id))
            .await?;
        uow.commit().await?;

        tracing::info!(
            license = %license.id,
            allocation = %key,
            use_cnt = after.use_cnt,
            license_cnt = after.license_cnt,
            admin = %admin.id,
            "License granted"
        );
        Ok(license.id)
    }

    /// Moves the termination date. Re-submitting the stored instant is a `NoOp`.
    pub async fn renew(&self, admin: &Admin, id: LicenseId, renewal: Renewal) -> Result<()> {
        let mut uow = self.store.begin().await?;
        let mut license = uow
            .license(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("license", id))?;
        let change = license.renew(renewal)?;
        self.history
            .append(
                uow.as_mut(),
                NewHistoryEntry::subscription_updated(&license, change.clone(), admin.id),
            )
            .await?;
        let activate_count = license.activate_count;
        uow.update_license(license).await?;
        uow.commit().await?;

        tracing::info!(
            license = %id,
            previous = %change.previous,
            terminate = %change.new,
            activate_count,
            admin = %admin.id,
            "Subscription renewed"
        );
        Ok(())
    }

    /// Soft-deletes a license and returns its unit to the allocation.
    pub async fn withdraw(&self, admin: &Admin, id: LicenseId) -> Result<()> {
        let mut uow = self.store.begin().await?;
        let mut license = uow
            .license(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("license", id))?;
        if license.deleted {
            return Err(LedgerError::AlreadyWithdrawn(id));
        }

        let key = license.allocation_key();
        uow.allocation(&key).await?.apply(QuotaChange::Usage(-1))?;
        license.withdraw()?;
        self.history
            .append(uow.as_mut(), NewHistoryEntry::subscription_withdrawn(&license, admin.id))
            .await?;
        uow.update_license(license).await?;
        uow.commit().await?;

        tracing::info!(
            license = %id,
            allocation = %key,
            admin = %admin.id,
            "Subscription withdrawn"
        );
        Ok(())
    }

    /// Replaces the site and contact fields. Writes no history.
    pub async fn edit(&self, admin: &Admin, id: LicenseId, site: SiteContact) -> Result<()> {
        site.validate()?;
        let mut uow = self.store.begin().await?;
        let mut license = uow
            .license(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("license", id))?;
        license.edit_site(site)?;
        uow.update_license(license).await?;
        uow.commit().await?;

        tracing::info!(license = %id, admin = %admin.id, "License fields edited");
        Ok(())
    }

    pub async fn license(&self, id: LicenseId) -> Result<License> {
        self.store
            .license(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("license", id))
    }

    /// Every license row, withdrawn ones included.
    pub async fn licenses(&self) -> Result<Vec<License>> {
        self.store.licenses().await
    }

    /// Non-withdrawn licenses of a product, optionally narrowed to one company.
    pub async fn active_grants(
        &self,
        product_type: &ProductType,
        company: Option<CompanyId>,
    ) -> Result<Vec<License>> {
        let licenses = self.store.licenses().await?;
        Ok(licenses
            .into_iter()
            .filter(|l| !l.deleted && &l.product_type == product_type)
            .filter(|l| company.is_none_or(|c| l.company == c))
            .collect())
    }

    /// Non-withdrawn licenses of a product carrying the given activation code.
    pub async fn active_by_code(
        &self,
        product_type: &ProductType,
        unique_code: &str,
    ) -> Result<Vec<License>> {
        let licenses = self.store.licenses().await?;
        Ok(licenses
            .into_iter()
            .filter(|l| {
                !l.deleted && &l.product_type == product_type && l.unique_code == unique_code
            })
            .collect())
    }
}
