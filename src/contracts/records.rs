use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::contracts::error::FrontdeskError;

/// Patient gender. The front desk only records these two values; anything
/// else is rejected at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Male" => Some(Gender::Male),
            "Female" => Some(Gender::Female),
            _ => None,
        }
    }
}

/// A patient record. `medical_record_no` is issued by the sequence generator
/// at creation time and never changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: u64,
    pub medical_record_no: String,
    pub full_name: String,
    pub date_of_birth: NaiveDate,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub photo_url: Option<String>,
    pub gender: Option<Gender>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A visit registration. `registration_no` is issued by the sequence
/// generator inside the same transaction that persists this row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub id: u64,
    pub registration_no: String,
    pub patient_id: u64,
    pub registration_date: NaiveDate,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Fields for creating a patient. Required-field validation happens at the
/// API boundary; the store assumes a well-formed value.
#[derive(Debug, Clone)]
pub struct NewPatient {
    pub full_name: String,
    pub date_of_birth: NaiveDate,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub photo_url: Option<String>,
    pub gender: Option<Gender>,
}

/// Fields for creating a registration. Exactly one of `patient_id` or
/// `patient` must be set; an inline `patient` is created in the same
/// transaction and receives its own medical record number.
#[derive(Debug, Clone)]
pub struct NewRegistration {
    pub patient_id: Option<u64>,
    pub patient: Option<NewPatient>,
    pub registration_date: NaiveDate,
    pub notes: Option<String>,
}

/// Partial patient update. `None` leaves a field untouched; `Some(None)`
/// clears a nullable field.
#[derive(Debug, Clone, Default)]
pub struct PatientUpdate {
    pub full_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub phone: Option<Option<String>>,
    pub address: Option<Option<String>>,
    pub photo_url: Option<Option<String>>,
    pub gender: Option<Option<Gender>>,
}

impl PatientUpdate {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.date_of_birth.is_none()
            && self.phone.is_none()
            && self.address.is_none()
            && self.photo_url.is_none()
            && self.gender.is_none()
    }
}

/// Partial registration update.
#[derive(Debug, Clone, Default)]
pub struct RegistrationUpdate {
    pub patient_id: Option<u64>,
    pub registration_date: Option<NaiveDate>,
    pub notes: Option<Option<String>>,
}

impl RegistrationUpdate {
    pub fn is_empty(&self) -> bool {
        self.patient_id.is_none() && self.registration_date.is_none() && self.notes.is_none()
    }
}

/// Patient list filters. All filters are conjunctive; `name` and `rm` match
/// case-insensitive substrings.
#[derive(Debug, Clone, Default)]
pub struct PatientQuery {
    pub id: Option<u64>,
    pub name: Option<String>,
    pub dob: Option<NaiveDate>,
    pub rm: Option<String>,
    pub limit: usize,
}

/// Registration list filters. `queue` is a unified search across patient
/// name, medical record number, registration number, and (when it looks like
/// a date) date of birth; when set, the individual reg/rm/name/dob filters
/// are ignored.
#[derive(Debug, Clone, Default)]
pub struct RegistrationQuery {
    pub id: Option<u64>,
    pub queue: Option<String>,
    pub reg: Option<String>,
    pub rm: Option<String>,
    pub name: Option<String>,
    pub dob: Option<NaiveDate>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub deleted_only: bool,
    pub include_deleted: bool,
    pub limit: usize,
}

/// A patient joined with the date of their most recent active registration.
#[derive(Debug, Clone, Serialize)]
pub struct PatientWithActivity {
    #[serde(flatten)]
    pub patient: Patient,
    pub latest_reg_date: Option<NaiveDate>,
}

/// A registration joined with its patient's identifying fields.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationDetail {
    #[serde(flatten)]
    pub registration: Registration,
    pub full_name: String,
    pub medical_record_no: String,
    pub date_of_birth: NaiveDate,
    pub gender: Option<Gender>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationSummary {
    pub id: u64,
    pub registration_no: String,
    pub registration_date: NaiveDate,
    pub full_name: String,
    pub medical_record_no: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatientSummary {
    pub id: u64,
    pub full_name: String,
    pub medical_record_no: String,
    pub created_at: DateTime<Utc>,
}

/// Dashboard counters plus the most recent activity.
#[derive(Debug, Clone, Serialize)]
pub struct ClinicStats {
    pub total_patients: u64,
    pub total_registrations: u64,
    pub today_registrations: u64,
    pub recent_activity: Vec<RegistrationSummary>,
    pub latest_patients: Vec<PatientSummary>,
}

/// Durable store of patients and registrations.
///
/// # Invariants
/// - Creation workflows issue sequence codes and insert the owning entity in
///   one transaction: a failed insert rolls the counter increment back
/// - `medical_record_no` and `registration_no` are unique across all rows
/// - Soft-deleted rows stay addressable; hard delete of a patient is refused
///   while registrations reference it
pub trait ClinicStore: Send + Sync {
    fn create_patient(&self, new: NewPatient, now: DateTime<Utc>)
        -> Result<Patient, FrontdeskError>;

    fn list_patients(&self, query: &PatientQuery)
        -> Result<Vec<PatientWithActivity>, FrontdeskError>;

    fn update_patient(
        &self,
        id: u64,
        update: PatientUpdate,
        now: DateTime<Utc>,
    ) -> Result<Patient, FrontdeskError>;

    /// Soft-deletes (or restores) a patient.
    fn set_patient_deleted(
        &self,
        id: u64,
        deleted: bool,
        now: DateTime<Utc>,
    ) -> Result<Patient, FrontdeskError>;

    /// Hard delete. Fails with a conflict while registrations reference the
    /// patient.
    fn delete_patient(&self, id: u64) -> Result<Patient, FrontdeskError>;

    fn create_registration(
        &self,
        new: NewRegistration,
        now: DateTime<Utc>,
    ) -> Result<Registration, FrontdeskError>;

    fn list_registrations(
        &self,
        query: &RegistrationQuery,
    ) -> Result<Vec<RegistrationDetail>, FrontdeskError>;

    fn update_registration(
        &self,
        id: u64,
        update: RegistrationUpdate,
        now: DateTime<Utc>,
    ) -> Result<Registration, FrontdeskError>;

    fn set_registration_deleted(
        &self,
        id: u64,
        deleted: bool,
        now: DateTime<Utc>,
    ) -> Result<Registration, FrontdeskError>;

    fn delete_registration(&self, id: u64) -> Result<Registration, FrontdeskError>;

    fn stats(&self, today: NaiveDate) -> Result<ClinicStats, FrontdeskError>;
}
