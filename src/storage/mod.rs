//! Storage layer: the RocksDB-backed clinic store, the daily sequence
//! generator, and transaction retry policy.

mod retry;
mod rocksdb;
mod sequence;

pub use retry::{is_lock_conflict, RetryConfig};
pub use rocksdb::RocksDbClinicStore;
pub use sequence::{DailySequenceGenerator, SequenceFormat};
