//! License quota and subscription ledger.
//!
//! Tracks granted versus consumed license units per (company, product type),
//! records every quota-changing event in a history trail, and supports reversible
//! quota transfers and subscription renewal and withdrawal.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
pub mod telemetry;
