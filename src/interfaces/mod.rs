//! Outer adapters that turn external input into ledger commands and report results.

pub mod csv;
