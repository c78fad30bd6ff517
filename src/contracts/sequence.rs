use std::fmt;

use chrono::NaiveDate;

use crate::contracts::error::{SequenceError, StorageError};

/// A closed category of daily identifier. Each type keeps its own
/// independent counter per calendar day.
///
/// # Invariants
/// - At most one counter row exists per (date, type) pair
/// - `last_value` never decreases and advances by exactly 1 per issuance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceType {
    /// Medical record number ("RM"), assigned once per patient.
    MedicalRecord,
    /// Registration number ("REG"), assigned once per visit.
    Registration,
}

impl SequenceType {
    pub const ALL: [SequenceType; 2] = [SequenceType::MedicalRecord, SequenceType::Registration];

    /// Short tag used in counter keys and metrics labels.
    pub fn tag(&self) -> &'static str {
        match self {
            SequenceType::MedicalRecord => "RM",
            SequenceType::Registration => "REG",
        }
    }

    /// Parses a tag back into a sequence type. Fails fast on anything
    /// outside the recognized set, before any storage access happens.
    pub fn parse(tag: &str) -> Result<Self, SequenceError> {
        match tag {
            "RM" => Ok(SequenceType::MedicalRecord),
            "REG" => Ok(SequenceType::Registration),
            other => Err(SequenceError::InvalidType(other.to_string())),
        }
    }
}

impl fmt::Display for SequenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One open unit of work against the counter store.
///
/// Implemented by the storage engine's transaction handle so that a counter
/// increment joins whatever larger transaction the caller is composing.
pub trait CounterTx {
    /// Atomically inserts the counter row for (date, type) with value 1, or
    /// increments an existing row, returning the resulting value.
    ///
    /// The read-modify-write must execute under a storage-engine row lock;
    /// concurrent calls for the same key are serialized by the engine, never
    /// by application code.
    fn increment(&self, date: NaiveDate, seq_type: SequenceType) -> Result<u64, StorageError>;

    /// Reads the last issued value for (date, type) without advancing it.
    fn last_value(
        &self,
        date: NaiveDate,
        seq_type: SequenceType,
    ) -> Result<Option<u64>, StorageError>;
}

/// Durable store of daily counters with scoped transactions.
///
/// `with_counter_tx` is the standalone entry point: it commits when the
/// closure returns Ok, rolls back when it returns Err, and always releases
/// the transaction. Callers already inside a transaction use their own
/// handle's `CounterTx` impl instead.
pub trait CounterStore: Send + Sync {
    fn with_counter_tx<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StorageError>,
        F: FnOnce(&dyn CounterTx) -> Result<T, E>;

    /// Last committed value for (date, type), bypassing any open transaction.
    fn last_committed(
        &self,
        date: NaiveDate,
        seq_type: SequenceType,
    ) -> Result<Option<u64>, StorageError>;
}
