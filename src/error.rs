use crate::domain::ids::{HistoryId, LicenseId};
use miette::Diagnostic;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    #[diagnostic(code(ledger::validation_error))]
    ValidationError(String),

    #[error("{entity} not found: {id}")]
    #[diagnostic(code(ledger::not_found))]
    NotFound { entity: &'static str, id: String },

    #[error("No changes made: {0}")]
    #[diagnostic(code(ledger::no_op))]
    NoOp(String),

    #[error("License {0} has already been withdrawn")]
    #[diagnostic(code(ledger::already_withdrawn))]
    AlreadyWithdrawn(LicenseId),

    #[error("History entry {0} has already been canceled")]
    #[diagnostic(code(ledger::already_canceled))]
    AlreadyCanceled(HistoryId),

    #[error("Conflict: {0}")]
    #[diagnostic(
        code(ledger::conflict),
        help("the operation was not applied; retry it if appropriate")
    )]
    Conflict(String),

    #[error("Timed out after {0:?} waiting for the ledger write lock")]
    #[diagnostic(code(ledger::timeout))]
    Timeout(Duration),

    #[error("Unauthorized: {0}")]
    #[diagnostic(code(ledger::unauthorized))]
    Unauthorized(String),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(ledger::config))]
    Config(String),

    #[error("CSV error: {0}")]
    #[diagnostic(code(ledger::csv))]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    #[diagnostic(code(ledger::io))]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(ledger::internal))]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

/// Machine-readable classification of a [`LedgerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ValidationError,
    NotFound,
    NoOp,
    AlreadyWithdrawn,
    AlreadyCanceled,
    Conflict,
    Timeout,
    Unauthorized,
    InvalidInput,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::NoOp => "no_op",
            ErrorKind::AlreadyWithdrawn => "already_withdrawn",
            ErrorKind::AlreadyCanceled => "already_canceled",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Internal => "internal",
        }
    }
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::ValidationError(_) => ErrorKind::ValidationError,
            LedgerError::NotFound { .. } => ErrorKind::NotFound,
            LedgerError::NoOp(_) => ErrorKind::NoOp,
            LedgerError::AlreadyWithdrawn(_) => ErrorKind::AlreadyWithdrawn,
            LedgerError::AlreadyCanceled(_) => ErrorKind::AlreadyCanceled,
            LedgerError::Conflict(_) => ErrorKind::Conflict,
            LedgerError::Timeout(_) => ErrorKind::Timeout,
            LedgerError::Unauthorized(_) => ErrorKind::Unauthorized,
            LedgerError::Config(_) | LedgerError::CsvError(_) | LedgerError::IoError(_) => {
                ErrorKind::InvalidInput
            }
            LedgerError::InternalError(_) => ErrorKind::Internal,
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::InternalError(Box::new(err))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LedgerError {
    fn from(err: rocksdb::Error) -> Self {
        LedgerError::Conflict(format!("store unavailable: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        assert_eq!(
            LedgerError::AlreadyWithdrawn(LicenseId(1)).kind().as_str(),
            "already_withdrawn"
        );
        assert_eq!(LedgerError::not_found("license", 3).kind().as_str(), "not_found");
        assert_eq!(
            LedgerError::Timeout(Duration::from_millis(10)).kind(),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn test_not_found_message() {
        let err = LedgerError::not_found("license", LicenseId(42));
        assert_eq!(err.to_string(), "license not found: 42");
    }
}
