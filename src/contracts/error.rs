use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrontdeskError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Sequence error: {0}")]
    Sequence(#[from] SequenceError),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("RocksDB error: {0}")]
    RocksDb(String),

    #[error("Lock conflict: {0}")]
    LockConflict(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt counter value at key {0}")]
    CorruptCounter(String),

    #[error("Patient not found: {0}")]
    PatientNotFound(u64),

    #[error("Registration not found: {0}")]
    RegistrationNotFound(u64),

    #[error("{entity} already exists: {code}")]
    AlreadyExists { entity: &'static str, code: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(String),
}

#[derive(Error, Debug)]
pub enum SequenceError {
    #[error("Unrecognized sequence type: {0}")]
    InvalidType(String),

    #[error("Daily capacity exhausted for {seq_type}: counter {counter} does not fit in {width} digits")]
    Overflow {
        seq_type: &'static str,
        counter: u64,
        width: usize,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
