use clap::Parser;
use license_ledger::application::ledger::{LicenseLedger, Outcome};
use license_ledger::config::Config;
use license_ledger::domain::command::Command;
use license_ledger::domain::ports::{Authenticator, LedgerStoreRef};
use license_ledger::infrastructure::in_memory::InMemoryLedgerStore;
use license_ledger::infrastructure::master_data::{InMemoryMasterData, StaticTokenAuthenticator};
#[cfg(feature = "storage-rocksdb")]
use license_ledger::infrastructure::rocksdb::RocksDBStore;
use license_ledger::interfaces::csv::allocation_writer::AllocationWriter;
use license_ledger::interfaces::csv::command_reader::{CommandReader, CommandRecord};
use license_ledger::telemetry;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input commands CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// TOML file with master data, admin tokens and tuning
    #[arg(long)]
    config: Option<PathBuf>,

    /// Reconcile every allocation against its history trail before reporting
    #[arg(long)]
    audit: bool,
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<PathBuf>, tx_timeout: Duration) -> Result<LedgerStoreRef> {
    let store: LedgerStoreRef = match db_path {
        Some(path) => Arc::new(RocksDBStore::open(path)?.with_timeout(tx_timeout)),
        None => Arc::new(InMemoryLedgerStore::with_timeout(tx_timeout)),
    };
    Ok(store)
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<PathBuf>, tx_timeout: Duration) -> Result<LedgerStoreRef> {
    if db_path.is_some() {
        tracing::warn!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature \
             is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Arc::new(InMemoryLedgerStore::with_timeout(tx_timeout)))
}

async fn process(
    ledger: &LicenseLedger,
    authenticator: &dyn Authenticator,
    mut record: CommandRecord,
) -> license_ledger::error::Result<Outcome> {
    let token = record.token.take().unwrap_or_default();
    let admin = authenticator.authenticate(&token).await?;
    let command = Command::try_from(record)?;
    ledger.execute(&admin, command).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    }
    .with_env()?;
    telemetry::init(&config.log_filter);

    let store = open_store(cli.db_path.or_else(|| config.db_path.clone()), config.tx_timeout())?;
    let ledger = LicenseLedger::new(store, Arc::new(InMemoryMasterData::from_config(&config)));
    let authenticator = StaticTokenAuthenticator::from_config(&config);

    // Process commands
    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for (index, record) in reader.records().enumerate() {
        let row = index + 1;
        match record {
            Ok(record) => match process(&ledger, &authenticator, record).await {
                Ok(outcome) => tracing::debug!(row, ?outcome, "Command applied"),
                Err(e) => {
                    tracing::warn!(row, kind = e.kind().as_str(), "Error processing command: {e}")
                }
            },
            Err(e) => tracing::warn!(row, "Error reading command: {e}"),
        }
    }

    if cli.audit {
        let drifted = ledger
            .audit()
            .await?
            .iter()
            .filter(|r| !r.is_consistent())
            .count();
        if drifted > 0 {
            tracing::warn!(drifted, "Audit found allocations out of step with their history");
        }
    }

    // Output final allocations
    let allocations = ledger.allocations().await?;
    let stdout = io::stdout();
    let mut writer = AllocationWriter::new(stdout.lock());
    writer.write_allocations(&allocations)?;

    Ok(())
}
