pub mod error;
pub mod records;
pub mod sequence;

pub use error::{FrontdeskError, SequenceError, StorageError};
pub use records::{
    ClinicStats, ClinicStore, Gender, NewPatient, NewRegistration, Patient, PatientQuery,
    PatientSummary, PatientUpdate, PatientWithActivity, Registration, RegistrationDetail,
    RegistrationQuery, RegistrationSummary, RegistrationUpdate,
};
pub use sequence::{CounterStore, CounterTx, SequenceType};
