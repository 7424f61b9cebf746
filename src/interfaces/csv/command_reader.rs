use crate::domain::allocation::AllocationKey;
use crate::domain::command::{Command, TransferRequest};
use crate::domain::ids::{CompanyId, HistoryId, LicenseId, ProductType};
use crate::domain::license::{LicenseGrant, Renewal, SiteContact};
use crate::domain::time::Timestamp;
use crate::error::{LedgerError, Result};
use chrono::DateTime;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandOp {
    Grant,
    Renew,
    Edit,
    Withdraw,
    Issue,
    Transfer,
    Reverse,
}

/// One row of the command input. Empty cells and missing trailing columns are `None`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandRecord {
    pub op: CommandOp,
    pub token: Option<String>,
    pub license: Option<u64>,
    pub entry: Option<u64>,
    pub company: Option<u32>,
    pub target: Option<u32>,
    pub product: Option<String>,
    pub units: Option<u32>,
    pub dealer: Option<String>,
    pub country: Option<String>,
    pub hospital: Option<String>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub hardware: Option<String>,
    pub detector: Option<String>,
    pub unique_code: Option<String>,
    pub start_local: Option<String>,
    pub start_utc: Option<String>,
    pub end_local: Option<String>,
    pub end_utc: Option<String>,
    pub at_local: Option<String>,
    pub at_utc: Option<String>,
}

fn required<T>(value: Option<T>, column: &str) -> Result<T> {
    value.ok_or_else(|| LedgerError::ValidationError(format!("missing column: {column}")))
}

/// Builds a timestamp from a local/UTC column pair. The UTC column may be omitted.
fn timestamp(local: Option<&str>, utc: Option<&str>, column: &str) -> Result<Option<Timestamp>> {
    match (local, utc) {
        (Some(local), Some(utc)) => Timestamp::parse(local, utc).map(Some),
        (Some(local), None) => DateTime::parse_from_rfc3339(local)
            .map(|local| Some(Timestamp::from_local(local)))
            .map_err(|e| LedgerError::ValidationError(format!("invalid {column} '{local}': {e}"))),
        (None, Some(_)) => Err(LedgerError::ValidationError(format!(
            "{column} needs a local time"
        ))),
        (None, None) => Ok(None),
    }
}

impl CommandRecord {
    fn site(&self) -> SiteContact {
        SiteContact {
            dealer_company: self.dealer.clone().unwrap_or_default(),
            country: self.country.clone().unwrap_or_default(),
            hospital: self.hospital.clone().unwrap_or_default(),
            user_name: self.user_name.clone(),
            user_email: self.user_email.clone(),
            hardware_info: self.hardware.clone(),
            detector_serial: self.detector.clone(),
        }
    }

    fn license_id(&self) -> Result<LicenseId> {
        required(self.license, "license").map(LicenseId)
    }

    fn product_type(&self) -> Result<ProductType> {
        required(self.product.as_deref(), "product").map(ProductType::from)
    }

    fn start(&self) -> Result<Timestamp> {
        let start = timestamp(self.start_local.as_deref(), self.start_utc.as_deref(), "start")?;
        required(start, "start_local")
    }

    fn end(&self) -> Result<Timestamp> {
        let end = timestamp(self.end_local.as_deref(), self.end_utc.as_deref(), "end")?;
        required(end, "end_local")
    }
}

impl TryFrom<CommandRecord> for Command {
    type Error = LedgerError;

    fn try_from(record: CommandRecord) -> Result<Self> {
        let command = match record.op {
            CommandOp::Grant => Command::Grant(LicenseGrant {
                company: CompanyId(required(record.company, "company")?),
                product_type: record.product_type()?,
                site: record.site(),
                unique_code: record.unique_code.clone().unwrap_or_default(),
                activate_start: record.start()?,
                terminate: record.end()?,
            }),
            CommandOp::Renew => {
                let at = timestamp(record.at_local.as_deref(), record.at_utc.as_deref(), "at")?;
                let updated_at = at.unwrap_or_else(Timestamp::now);
                Command::Renew {
                    license: record.license_id()?,
                    renewal: Renewal {
                        terminate: record.end()?,
                        unique_code: record.unique_code.clone().unwrap_or_default(),
                        updated_at,
                    },
                }
            }
            CommandOp::Edit => Command::Edit {
                license: record.license_id()?,
                site: record.site(),
            },
            CommandOp::Withdraw => Command::Withdraw {
                license: record.license_id()?,
            },
            CommandOp::Issue => Command::Issue {
                key: AllocationKey::new(
                    CompanyId(required(record.company, "company")?),
                    record.product_type()?,
                ),
                units: required(record.units, "units")?,
            },
            CommandOp::Transfer => Command::Transfer(TransferRequest {
                source: CompanyId(required(record.company, "company")?),
                target: CompanyId(required(record.target, "target")?),
                product_type: record.product_type()?,
                units: required(record.units, "units")?,
            }),
            CommandOp::Reverse => Command::Reverse {
                entry: HistoryId(required(record.entry, "entry")?),
            },
        };
        Ok(command)
    }
}

/// Reads ledger commands from a CSV source.
///
/// This reader wraps `csv::Reader` and provides an iterator over `Result<CommandRecord>`.
/// Whitespace is trimmed and rows may stop short of the header.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes one record per row.
    pub fn records(self) -> impl Iterator<Item = Result<CommandRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(LedgerError::from))
    }
}
