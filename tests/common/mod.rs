#![allow(dead_code)]

use license_ledger::application::ledger::LicenseLedger;
use license_ledger::domain::allocation::AllocationKey;
use license_ledger::domain::ids::{AdminId, CompanyId, ProductType};
use license_ledger::domain::license::{LicenseGrant, Renewal, SiteContact};
use license_ledger::domain::ports::{Admin, LedgerStoreRef};
use license_ledger::domain::time::Timestamp;
use license_ledger::infrastructure::in_memory::InMemoryLedgerStore;
use license_ledger::infrastructure::master_data::InMemoryMasterData;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;

pub const HEADER: [&str; 22] = [
    "op", "token", "license", "entry", "company", "target", "product", "units", "dealer",
    "country", "hospital", "user_name", "user_email", "hardware", "detector", "unique_code",
    "start_local", "start_utc", "end_local", "end_utc", "at_local", "at_utc",
];

/// Companies 1..=4, products `Chest` and `Bone Age`.
pub fn ledger_with(store: LedgerStoreRef) -> LicenseLedger {
    let master_data = InMemoryMasterData::new(
        (1..=4).map(CompanyId),
        [ProductType::from("Chest"), ProductType::from("Bone Age")],
    );
    LicenseLedger::new(store, Arc::new(master_data))
}

pub fn ledger() -> LicenseLedger {
    ledger_with(Arc::new(InMemoryLedgerStore::new()))
}

pub fn admin() -> Admin {
    Admin { id: AdminId(1) }
}

pub fn key(company: u32, product: &str) -> AllocationKey {
    AllocationKey::new(CompanyId(company), ProductType::from(product))
}

pub fn ts(local: &str, utc: &str) -> Timestamp {
    Timestamp::parse(local, utc).unwrap()
}

pub fn site() -> SiteContact {
    SiteContact {
        dealer_company: "Radisen".to_string(),
        country: "Korea".to_string(),
        hospital: "Seoul General".to_string(),
        user_name: Some("Kim".to_string()),
        user_email: None,
        hardware_info: None,
        detector_serial: Some("SN-1".to_string()),
    }
}

/// Active from 2024-11-01 to 2024-11-30, Korean local time.
pub fn grant(company: u32, product: &str) -> LicenseGrant {
    LicenseGrant {
        company: CompanyId(company),
        product_type: ProductType::from(product),
        site: site(),
        unique_code: "CODE-1".to_string(),
        activate_start: ts("2024-11-01T00:00:00+09:00", "2024-10-31T15:00:00Z"),
        terminate: ts("2024-11-30T00:00:00+09:00", "2024-11-29T15:00:00Z"),
    }
}

/// Moves the termination date to 2024-12-31, Korean local time.
pub fn renewal() -> Renewal {
    Renewal {
        terminate: ts("2024-12-31T00:00:00+09:00", "2024-12-30T15:00:00Z"),
        unique_code: "CODE-2".to_string(),
        updated_at: Timestamp::now(),
    }
}

/// Writes a command CSV. Each row lists `(column, value)` pairs; other cells stay empty.
pub fn write_commands(path: &Path, rows: &[&[(&str, &str)]]) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(HEADER)?;
    for row in rows {
        let record = HEADER.map(|column| {
            row.iter()
                .find(|(name, _)| *name == column)
                .map(|(_, value)| *value)
                .unwrap_or("")
        });
        wtr.write_record(record)?;
    }

    wtr.flush()?;
    Ok(())
}
