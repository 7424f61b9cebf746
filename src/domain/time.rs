use crate::error::{LedgerError, Result};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// A point in time kept in two forms: the caller's local wall clock and UTC.
///
/// Both forms always denote the same instant. Comparisons use the UTC form.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "RawTimestamp")]
pub struct Timestamp {
    local: DateTime<FixedOffset>,
    utc: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawTimestamp {
    local: DateTime<FixedOffset>,
    utc: DateTime<Utc>,
}

impl TryFrom<RawTimestamp> for Timestamp {
    type Error = LedgerError;

    fn try_from(raw: RawTimestamp) -> Result<Self> {
        Self::new(raw.local, raw.utc)
    }
}

impl Timestamp {
    /// Pairs a local and a UTC time, rejecting pairs that disagree on the instant.
    pub fn new(local: DateTime<FixedOffset>, utc: DateTime<Utc>) -> Result<Self> {
        if local.with_timezone(&Utc) != utc {
            return Err(LedgerError::ValidationError(format!(
                "local time {} and UTC time {} are different instants",
                local.to_rfc3339(),
                utc.to_rfc3339()
            )));
        }
        Ok(Self { local, utc })
    }

    pub fn from_local(local: DateTime<FixedOffset>) -> Self {
        Self {
            local,
            utc: local.with_timezone(&Utc),
        }
    }

    /// Parses an RFC 3339 local/UTC pair.
    pub fn parse(local: &str, utc: &str) -> Result<Self> {
        let local = DateTime::parse_from_rfc3339(local).map_err(|e| {
            LedgerError::ValidationError(format!("invalid local time '{local}': {e}"))
        })?;
        let utc = DateTime::parse_from_rfc3339(utc)
            .map_err(|e| LedgerError::ValidationError(format!("invalid UTC time '{utc}': {e}")))?
            .with_timezone(&Utc);
        Self::new(local, utc)
    }

    pub fn now() -> Self {
        Self::from_local(Utc::now().fixed_offset())
    }

    pub fn local(&self) -> DateTime<FixedOffset> {
        self.local
    }

    pub fn utc(&self) -> DateTime<Utc> {
        self.utc
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.utc == other.utc
    }
}

impl Eq for Timestamp {}

impl Hash for Timestamp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.utc.hash(state);
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.utc.cmp(&other.utc)
    }
}
