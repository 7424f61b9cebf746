//! Configuration for the ledger runner

use crate::domain::ids::{AdminId, CompanyId};
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// RocksDB directory. In-memory storage when absent.
    pub db_path: Option<PathBuf>,

    /// Upper bound on waiting for the write lock (milliseconds)
    pub tx_timeout_ms: u64,

    /// `tracing` filter used when `RUST_LOG` is not set
    pub log_filter: String,

    /// Known companies
    pub companies: Vec<CompanyRecord>,

    /// Known product types
    pub products: Vec<String>,

    /// Credentials accepted in the command input
    pub admins: Vec<AdminCredential>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub id: CompanyId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminCredential {
    pub token: String,
    pub id: AdminId,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            tx_timeout_ms: 5_000,
            log_filter: "info".to_string(),
            companies: Vec::new(),
            products: Vec::new(),
            admins: Vec::new(),
        }
    }
}

impl Config {
    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| LedgerError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Apply environment overrides on top of `self`
    pub fn with_env(mut self) -> Result<Self> {
        if let Ok(path) = std::env::var("LEDGER_DB_PATH") {
            self.db_path = Some(PathBuf::from(path));
        }

        if let Ok(timeout) = std::env::var("LEDGER_TX_TIMEOUT_MS") {
            self.tx_timeout_ms = timeout.parse().map_err(|_| {
                LedgerError::Config(format!("LEDGER_TX_TIMEOUT_MS is not a number: {timeout}"))
            })?;
        }

        if let Ok(filter) = std::env::var("LEDGER_LOG") {
            self.log_filter = filter;
        }

        Ok(self)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self> {
        Self::default().with_env()
    }

    pub fn tx_timeout(&self) -> Duration {
        Duration::from_millis(self.tx_timeout_ms)
    }
}
