//! Domain model of the license quota ledger: identifiers, licenses, allocations,
//! the history trail and the ports the application layer depends on.

pub mod allocation;
pub mod command;
pub mod history;
pub mod ids;
pub mod license;
pub mod ports;
pub mod time;
