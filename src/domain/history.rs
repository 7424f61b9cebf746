use super::allocation::{AllocationKey, QuotaAllocation};
use super::ids::{AdminId, CompanyId, HistoryId, LicenseId, ProductType};
use super::license::License;
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of history descriptions. The serialized form is the display label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Description {
    #[serde(rename = "Generated")]
    Generated,
    #[serde(rename = "Generated Canceled")]
    GeneratedCanceled,
    #[serde(rename = "Transfer")]
    Transfer,
    #[serde(rename = "Transfer Canceled")]
    TransferCanceled,
    #[serde(rename = "Subscription updated")]
    SubscriptionUpdated,
    #[serde(rename = "Subscription withdrawn")]
    SubscriptionWithdrawn,
}

impl Description {
    pub fn as_str(&self) -> &'static str {
        match self {
            Description::Generated => "Generated",
            Description::GeneratedCanceled => "Generated Canceled",
            Description::Transfer => "Transfer",
            Description::TransferCanceled => "Transfer Canceled",
            Description::SubscriptionUpdated => "Subscription updated",
            Description::SubscriptionWithdrawn => "Subscription withdrawn",
        }
    }

    /// Entries that record the undoing of another entry.
    pub fn is_reversal(&self) -> bool {
        matches!(
            self,
            Description::GeneratedCanceled | Description::TransferCanceled
        )
    }
}

impl fmt::Display for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Previous and new termination instants recorded on renewal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryChange {
    pub previous: DateTime<Utc>,
    pub new: DateTime<Utc>,
    pub unique_code: String,
}

/// A history entry before the store has assigned its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHistoryEntry {
    pub license: Option<LicenseId>,
    pub company: CompanyId,
    pub product_type: ProductType,
    pub description: Description,
    pub prev_cnt: u32,
    pub new_cnt: u32,
    pub source: Option<CompanyId>,
    pub target: Option<CompanyId>,
    pub expiry: Option<ExpiryChange>,
    pub deleted: bool,
    pub admin_id: AdminId,
    pub recorded_at: DateTime<Utc>,
    pub reverses: Option<HistoryId>,
}

impl NewHistoryEntry {
    fn for_license(
        license: &License,
        description: Description,
        prev_cnt: u32,
        admin_id: AdminId,
    ) -> Self {
        Self {
            license: Some(license.id),
            company: license.company,
            product_type: license.product_type.clone(),
            description,
            prev_cnt,
            new_cnt: license.activate_count,
            source: None,
            target: None,
            expiry: None,
            deleted: license.deleted,
            admin_id,
            recorded_at: Utc::now(),
            reverses: None,
        }
    }

    fn for_allocation(
        key: &AllocationKey,
        description: Description,
        prev_cnt: u32,
        new_cnt: u32,
        admin_id: AdminId,
    ) -> Self {
        Self {
            license: None,
            company: key.company,
            product_type: key.product_type.clone(),
            description,
            prev_cnt,
            new_cnt,
            source: None,
            target: None,
            expiry: None,
            deleted: false,
            admin_id,
            recorded_at: Utc::now(),
            reverses: None,
        }
    }

    /// `Generated 0 -> 1` for a freshly granted license.
    pub fn license_granted(license: &License, admin_id: AdminId) -> Self {
        Self::for_license(license, Description::Generated, 0, admin_id)
    }

    /// `license` is the row after renewal.
    pub fn subscription_updated(
        license: &License,
        expiry: ExpiryChange,
        admin_id: AdminId,
    ) -> Self {
        let mut entry = Self::for_license(
            license,
            Description::SubscriptionUpdated,
            license.activate_count - 1,
            admin_id,
        );
        entry.expiry = Some(expiry);
        entry
    }

    /// `license` is the row after withdrawal.
    pub fn subscription_withdrawn(license: &License, admin_id: AdminId) -> Self {
        Self::for_license(
            license,
            Description::SubscriptionWithdrawn,
            license.activate_count + 1,
            admin_id,
        )
    }

    pub fn quota_issued(
        before: &QuotaAllocation,
        after: &QuotaAllocation,
        admin_id: AdminId,
    ) -> Self {
        Self::for_allocation(
            &after.key,
            Description::Generated,
            before.license_cnt,
            after.license_cnt,
            admin_id,
        )
    }

    pub fn issuance_canceled(
        original: &HistoryEntry,
        before: &QuotaAllocation,
        after: &QuotaAllocation,
        admin_id: AdminId,
    ) -> Self {
        let mut entry = Self::for_allocation(
            &after.key,
            Description::GeneratedCanceled,
            before.license_cnt,
            after.license_cnt,
            admin_id,
        );
        entry.reverses = Some(original.id);
        entry
    }

    /// Recorded from the target side: `prev_cnt`/`new_cnt` are the target's counts.
    pub fn transferred(
        source: CompanyId,
        target_before: &QuotaAllocation,
        target_after: &QuotaAllocation,
        admin_id: AdminId,
    ) -> Self {
        let mut entry = Self::for_allocation(
            &target_after.key,
            Description::Transfer,
            target_before.license_cnt,
            target_after.license_cnt,
            admin_id,
        );
        entry.source = Some(source);
        entry.target = Some(target_after.key.company);
        entry
    }

    pub fn transfer_canceled(
        original: &HistoryEntry,
        target_before: &QuotaAllocation,
        target_after: &QuotaAllocation,
        admin_id: AdminId,
    ) -> Self {
        let mut entry = Self::for_allocation(
            &target_after.key,
            Description::TransferCanceled,
            target_before.license_cnt,
            target_after.license_cnt,
            admin_id,
        );
        entry.source = original.source;
        entry.target = original.target;
        entry.reverses = Some(original.id);
        entry
    }

    pub fn into_entry(self, id: HistoryId) -> HistoryEntry {
        HistoryEntry {
            id,
            license: self.license,
            company: self.company,
            product_type: self.product_type,
            description: self.description,
            prev_cnt: self.prev_cnt,
            new_cnt: self.new_cnt,
            source: self.source,
            target: self.target,
            expiry: self.expiry,
            deleted: self.deleted,
            admin_id: self.admin_id,
            recorded_at: self.recorded_at,
            canceled: false,
            reverses: self.reverses,
        }
    }
}

/// One audit record. Append-only apart from the one-time `canceled` flip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: HistoryId,
    pub license: Option<LicenseId>,
    pub company: CompanyId,
    pub product_type: ProductType,
    pub description: Description,
    pub prev_cnt: u32,
    pub new_cnt: u32,
    pub source: Option<CompanyId>,
    pub target: Option<CompanyId>,
    pub expiry: Option<ExpiryChange>,
    pub deleted: bool,
    pub admin_id: AdminId,
    pub recorded_at: DateTime<Utc>,
    pub canceled: bool,
    pub reverses: Option<HistoryId>,
}

impl HistoryEntry {
    pub fn is_allocation_scoped(&self) -> bool {
        self.license.is_none()
    }

    /// Units moved by a count-changing entry.
    pub fn units(&self) -> u32 {
        self.new_cnt.abs_diff(self.prev_cnt)
    }

    pub fn mark_canceled(&mut self) -> Result<()> {
        if self.canceled {
            return Err(LedgerError::AlreadyCanceled(self.id));
        }
        self.canceled = true;
        Ok(())
    }

    /// Whether the entry belongs to the trail of `key`, including as a transfer source.
    pub fn touches(&self, key: &AllocationKey) -> bool {
        self.product_type == key.product_type
            && (self.company == key.company || self.source == Some(key.company))
    }

    /// Contribution of this entry to `key`'s granted units.
    pub fn capacity_delta(&self, key: &AllocationKey) -> i64 {
        if self.canceled || !self.is_allocation_scoped() || self.product_type != key.product_type {
            return 0;
        }
        let delta = i64::from(self.new_cnt) - i64::from(self.prev_cnt);
        match self.description {
            Description::Generated if self.company == key.company => delta,
            Description::Transfer if self.target == Some(key.company) => delta,
            Description::Transfer if self.source == Some(key.company) => -delta,
            _ => 0,
        }
    }

    /// Contribution of this entry to `key`'s consumed units.
    pub fn usage_delta(&self, key: &AllocationKey) -> i64 {
        if self.canceled
            || self.is_allocation_scoped()
            || self.company != key.company
            || self.product_type != key.product_type
        {
            return 0;
        }
        match self.description {
            Description::Generated => 1,
            Description::SubscriptionWithdrawn => -1,
            _ => 0,
        }
    }
}

/// Recomputes an allocation from its trail. `entries` must be in chronological order.
pub fn fold_allocation<'a>(
    key: &AllocationKey,
    entries: impl IntoIterator<Item = &'a HistoryEntry>,
) -> Result<QuotaAllocation> {
    let (license_cnt, use_cnt) = entries.into_iter().fold((0i64, 0i64), |(l, u), entry| {
        (l + entry.capacity_delta(key), u + entry.usage_delta(key))
    });
    match (u32::try_from(license_cnt), u32::try_from(use_cnt)) {
        (Ok(license_cnt), Ok(use_cnt)) => Ok(QuotaAllocation {
            key: key.clone(),
            license_cnt,
            use_cnt,
        }),
        _ => Err(LedgerError::InternalError(
            format!("history trail for {key} folds to ({license_cnt}, {use_cnt})").into(),
        )),
    }
}
