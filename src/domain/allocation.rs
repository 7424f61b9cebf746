//! Quota accounting for a (company, product type) allocation.
//!
//! Everything here is pure: the accountant decides whether a proposed change keeps
//! `0 <= use_cnt <= license_cnt` and computes the resulting pair. Persisting the
//! outcome is the caller's job.

use super::ids::{CompanyId, ProductType};
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one allocation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AllocationKey {
    pub company: CompanyId,
    pub product_type: ProductType,
}

impl AllocationKey {
    pub fn new(company: CompanyId, product_type: ProductType) -> Self {
        Self {
            company,
            product_type,
        }
    }
}

impl fmt::Display for AllocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.company, self.product_type)
    }
}

/// Granted versus consumed units for one allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaAllocation {
    pub key: AllocationKey,
    pub license_cnt: u32,
    pub use_cnt: u32,
}

/// A proposed change to an allocation. Positive values grow the count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaChange {
    /// Change to granted units (`license_cnt`).
    Capacity(i64),
    /// Change to consumed units (`use_cnt`).
    Usage(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The change would leave more units in use than granted.
    UsageExceedsCapacity { license_cnt: i64, use_cnt: i64 },
    /// The change would drive a count below zero.
    NegativeCount,
    /// The resulting count does not fit the counter.
    Overflow,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::UsageExceedsCapacity {
                license_cnt,
                use_cnt,
            } => write!(
                f,
                "usage would exceed capacity ({use_cnt} in use, {license_cnt} granted)"
            ),
            Rejection::NegativeCount => f.write_str("count would drop below zero"),
            Rejection::Overflow => f.write_str("count would overflow"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Admissible { license_cnt: u32, use_cnt: u32 },
    Rejected(Rejection),
}

impl QuotaAllocation {
    pub fn empty(key: AllocationKey) -> Self {
        Self {
            key,
            license_cnt: 0,
            use_cnt: 0,
        }
    }

    /// Units that can be consumed, transferred or canceled without breaking the invariant.
    pub fn headroom(&self) -> u32 {
        self.license_cnt.saturating_sub(self.use_cnt)
    }

    pub fn assess(&self, change: QuotaChange) -> Verdict {
        let (license_cnt, use_cnt) = match change {
            QuotaChange::Capacity(delta) => {
                (i64::from(self.license_cnt) + delta, i64::from(self.use_cnt))
            }
            QuotaChange::Usage(delta) => {
                (i64::from(self.license_cnt), i64::from(self.use_cnt) + delta)
            }
        };

        if license_cnt < 0 || use_cnt < 0 {
            return Verdict::Rejected(Rejection::NegativeCount);
        }
        if use_cnt > license_cnt {
            return Verdict::Rejected(Rejection::UsageExceedsCapacity {
                license_cnt,
                use_cnt,
            });
        }
        match (u32::try_from(license_cnt), u32::try_from(use_cnt)) {
            (Ok(license_cnt), Ok(use_cnt)) => Verdict::Admissible {
                license_cnt,
                use_cnt,
            },
            _ => Verdict::Rejected(Rejection::Overflow),
        }
    }

    /// Applies an admissible change, or reports why it is not.
    pub fn apply(&self, change: QuotaChange) -> Result<QuotaAllocation> {
        match self.assess(change) {
            Verdict::Admissible {
                license_cnt,
                use_cnt,
            } => Ok(QuotaAllocation {
                key: self.key.clone(),
                license_cnt,
                use_cnt,
            }),
            Verdict::Rejected(rejection) => Err(LedgerError::ValidationError(format!(
                "allocation {}: {}",
                self.key, rejection
            ))),
        }
    }
}
