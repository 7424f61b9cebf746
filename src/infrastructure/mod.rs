//! Adapters for the ports declared in `domain::ports`.

pub mod in_memory;
pub mod master_data;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub(crate) mod staging;
