use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use backon::BlockingRetryable;
use chrono::{DateTime, NaiveDate, Utc};
use rocksdb::{
    Direction, ErrorKind, IteratorMode, Options, Transaction, TransactionDB, TransactionDBOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::contracts::{
    ClinicStats, ClinicStore, CounterStore, CounterTx, FrontdeskError, NewPatient,
    NewRegistration, Patient, PatientQuery, PatientSummary, PatientUpdate, PatientWithActivity,
    Registration, RegistrationDetail, RegistrationQuery, RegistrationSummary, RegistrationUpdate,
    SequenceType, StorageError,
};
use crate::metrics::SequenceMetrics;
use crate::storage::retry::{is_lock_conflict, RetryConfig};
use crate::storage::sequence::{DailySequenceGenerator, SequenceFormat};

/// Key prefix for daily sequence counters
const COUNTER_PREFIX: &str = "ctr";
/// Key prefix for patient records
const PATIENT_PREFIX: &str = "pat";
/// Key prefix for the medical_record_no uniqueness index
const PATIENT_CODE_PREFIX: &str = "rm";
/// Key prefix for registration records
const REGISTRATION_PREFIX: &str = "reg";
/// Key prefix for the registration_no uniqueness index
const REGISTRATION_CODE_PREFIX: &str = "regno";
/// Key prefix for the patient -> registrations index
const PATIENT_REGS_PREFIX: &str = "patreg";
/// Key for the patient id allocator
const PATIENT_ID_KEY: &str = "id:patient";
/// Key for the registration id allocator
const REGISTRATION_ID_KEY: &str = "id:registration";

/// Lock wait budget for pessimistic transactions, in milliseconds.
/// Counter increments hold their row lock only for the duration of the
/// surrounding workflow transaction, so waits are normally far shorter.
const TXN_LOCK_TIMEOUT_MS: i64 = 10_000;

fn counter_key(date: NaiveDate, seq_type: SequenceType) -> String {
    format!(
        "{}:{}:{}",
        COUNTER_PREFIX,
        date.format("%Y-%m-%d"),
        seq_type.tag()
    )
}

fn patient_key(id: u64) -> String {
    format!("{}:{:016x}", PATIENT_PREFIX, id)
}

fn patient_code_key(code: &str) -> String {
    format!("{}:{}", PATIENT_CODE_PREFIX, code)
}

fn registration_key(id: u64) -> String {
    format!("{}:{:016x}", REGISTRATION_PREFIX, id)
}

fn registration_code_key(code: &str) -> String {
    format!("{}:{}", REGISTRATION_CODE_PREFIX, code)
}

fn patient_regs_key(patient_id: u64, registration_id: u64) -> String {
    format!(
        "{}:{:016x}:{:016x}",
        PATIENT_REGS_PREFIX, patient_id, registration_id
    )
}

fn map_rocks_err(e: rocksdb::Error) -> StorageError {
    match e.kind() {
        ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain => {
            StorageError::LockConflict(e.to_string())
        }
        _ => StorageError::RocksDb(e.to_string()),
    }
}

fn decode_counter(key: &str, raw: &[u8]) -> Result<u64, StorageError> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| StorageError::CorruptCounter(key.to_string()))?;
    Ok(u64::from_be_bytes(bytes))
}

fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode_json<T: DeserializeOwned>(raw: &[u8]) -> Result<T, StorageError> {
    serde_json::from_slice(raw).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// RocksDB-backed clinic store.
///
/// Uses a pessimistic `TransactionDB`: every counter increment runs as
/// `get_for_update` (exclusive row lock) + `put` inside a transaction, so
/// concurrent issuances for the same (date, type) key are serialized by the
/// storage engine. Record-creation workflows compose sequence issuance and
/// entity insertion in one transaction; a failed insert rolls the counter
/// increment back.
pub struct RocksDbClinicStore {
    db: TransactionDB,
    sequence: DailySequenceGenerator,
    retry: RetryConfig,
    sequence_metrics: Option<Arc<SequenceMetrics>>,
}

impl RocksDbClinicStore {
    /// Opens or creates a store at the given path.
    pub fn open(path: impl AsRef<Path>, format: SequenceFormat) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(TXN_LOCK_TIMEOUT_MS);
        txn_opts.set_default_lock_timeout(TXN_LOCK_TIMEOUT_MS);

        let db = TransactionDB::open(&opts, &txn_opts, path).map_err(map_rocks_err)?;

        Ok(Self {
            db,
            sequence: DailySequenceGenerator::new(format),
            retry: RetryConfig::default(),
            sequence_metrics: None,
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sequence_metrics(mut self, metrics: Arc<SequenceMetrics>) -> Self {
        self.sequence_metrics = Some(metrics);
        self
    }

    pub fn sequence(&self) -> &DailySequenceGenerator {
        &self.sequence
    }

    /// Runs `f` inside a transaction, committing on Ok and rolling back on
    /// Err. Lock conflicts are retried with backoff; everything else
    /// propagates to the caller untouched.
    fn run_txn<T>(
        &self,
        f: impl Fn(&Transaction<'_, TransactionDB>) -> Result<T, FrontdeskError>,
    ) -> Result<T, FrontdeskError> {
        let attempt = || {
            let txn = self.db.transaction();
            match f(&txn) {
                Ok(value) => {
                    txn.commit()
                        .map_err(|e| FrontdeskError::from(map_rocks_err(e)))?;
                    Ok(value)
                }
                Err(err) => {
                    if let Err(rb) = txn.rollback() {
                        tracing::warn!(error = %rb, "transaction rollback failed");
                    }
                    Err(err)
                }
            }
        };

        attempt
            .retry(self.retry.backoff())
            .when(is_lock_conflict)
            .notify(|err, dur| {
                if let Some(metrics) = &self.sequence_metrics {
                    metrics.record_lock_retry();
                }
                tracing::warn!(error = %err, retry_in = ?dur, "lock conflict, retrying transaction");
            })
            .call()
    }

    /// Allocates the next entity id under an exclusive lock on the allocator
    /// key, so ids also roll back with the surrounding transaction.
    fn alloc_id(
        txn: &Transaction<'_, TransactionDB>,
        allocator_key: &str,
    ) -> Result<u64, StorageError> {
        let next = match txn
            .get_for_update(allocator_key.as_bytes(), true)
            .map_err(map_rocks_err)?
        {
            Some(raw) => decode_counter(allocator_key, &raw)? + 1,
            None => 1,
        };
        txn.put(allocator_key.as_bytes(), next.to_be_bytes())
            .map_err(map_rocks_err)?;
        Ok(next)
    }

    /// Issues a medical record number and inserts the patient, all on the
    /// supplied transaction. Shared by direct creation and the inline-patient
    /// path of registration creation.
    fn insert_patient_tx(
        &self,
        txn: &Transaction<'_, TransactionDB>,
        new: &NewPatient,
        now: DateTime<Utc>,
    ) -> Result<Patient, FrontdeskError> {
        let code = self
            .sequence
            .issue(SequenceType::MedicalRecord, now, txn)?;

        // Correct sequencing makes a duplicate impossible; a hit here means
        // the counter store is misconfigured, so surface a distinct conflict.
        let code_key = patient_code_key(&code);
        if txn
            .get_for_update(code_key.as_bytes(), true)
            .map_err(map_rocks_err)?
            .is_some()
        {
            return Err(StorageError::AlreadyExists {
                entity: "patient",
                code,
            }
            .into());
        }

        let id = Self::alloc_id(txn, PATIENT_ID_KEY)?;
        let patient = Patient {
            id,
            medical_record_no: code,
            full_name: new.full_name.clone(),
            date_of_birth: new.date_of_birth,
            phone: new.phone.clone(),
            address: new.address.clone(),
            photo_url: new.photo_url.clone(),
            gender: new.gender,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        txn.put(patient_key(id).as_bytes(), encode_json(&patient)?)
            .map_err(map_rocks_err)?;
        txn.put(code_key.as_bytes(), id.to_be_bytes())
            .map_err(map_rocks_err)?;

        Ok(patient)
    }

    fn get_patient(&self, id: u64) -> Result<Option<Patient>, StorageError> {
        match self
            .db
            .get(patient_key(id).as_bytes())
            .map_err(map_rocks_err)?
        {
            Some(raw) => Ok(Some(decode_json(&raw)?)),
            None => Ok(None),
        }
    }

    fn get_registration(&self, id: u64) -> Result<Option<Registration>, StorageError> {
        match self
            .db
            .get(registration_key(id).as_bytes())
            .map_err(map_rocks_err)?
        {
            Some(raw) => Ok(Some(decode_json(&raw)?)),
            None => Ok(None),
        }
    }

    /// Collects every value stored under `prefix:`.
    fn scan_prefix<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, StorageError> {
        let start = format!("{}:", prefix);
        let mut out = Vec::new();
        for item in self
            .db
            .iterator(IteratorMode::From(start.as_bytes(), Direction::Forward))
        {
            let (key, value) = item.map_err(map_rocks_err)?;
            if !key.starts_with(start.as_bytes()) {
                break;
            }
            out.push(decode_json(&value)?);
        }
        Ok(out)
    }

    /// Registration ids referencing a patient, via the patient->registrations
    /// index.
    fn registration_ids_for(&self, patient_id: u64) -> Result<Vec<u64>, StorageError> {
        let start = format!("{}:{:016x}:", PATIENT_REGS_PREFIX, patient_id);
        let mut ids = Vec::new();
        for item in self
            .db
            .iterator(IteratorMode::From(start.as_bytes(), Direction::Forward))
        {
            let (key, _) = item.map_err(map_rocks_err)?;
            if !key.starts_with(start.as_bytes()) {
                break;
            }
            let hex = &key[start.len()..];
            let hex = std::str::from_utf8(hex)
                .map_err(|_| StorageError::Serialization("non-utf8 index key".into()))?;
            let id = u64::from_str_radix(hex, 16)
                .map_err(|_| StorageError::Serialization(format!("bad index key suffix: {hex}")))?;
            ids.push(id);
        }
        Ok(ids)
    }

    fn latest_registration_date(&self, patient_id: u64) -> Result<Option<NaiveDate>, StorageError> {
        let mut latest = None;
        for id in self.registration_ids_for(patient_id)? {
            if let Some(reg) = self.get_registration(id)? {
                if reg.deleted_at.is_none() {
                    latest = latest.max(Some(reg.registration_date));
                }
            }
        }
        Ok(latest)
    }
}

impl CounterTx for Transaction<'_, TransactionDB> {
    fn increment(&self, date: NaiveDate, seq_type: SequenceType) -> Result<u64, StorageError> {
        let key = counter_key(date, seq_type);
        // get_for_update takes an exclusive row lock, making the
        // read-increment-write indivisible with respect to concurrent
        // transactions targeting the same key.
        let next = match self
            .get_for_update(key.as_bytes(), true)
            .map_err(map_rocks_err)?
        {
            Some(raw) => decode_counter(&key, &raw)? + 1,
            None => 1,
        };
        self.put(key.as_bytes(), next.to_be_bytes())
            .map_err(map_rocks_err)?;
        Ok(next)
    }

    fn last_value(
        &self,
        date: NaiveDate,
        seq_type: SequenceType,
    ) -> Result<Option<u64>, StorageError> {
        let key = counter_key(date, seq_type);
        match self.get(key.as_bytes()).map_err(map_rocks_err)? {
            Some(raw) => Ok(Some(decode_counter(&key, &raw)?)),
            None => Ok(None),
        }
    }
}

impl CounterStore for RocksDbClinicStore {
    fn with_counter_tx<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StorageError>,
        F: FnOnce(&dyn CounterTx) -> Result<T, E>,
    {
        let txn = self.db.transaction();
        match f(&txn) {
            Ok(value) => {
                txn.commit().map_err(|e| E::from(map_rocks_err(e)))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rb) = txn.rollback() {
                    tracing::warn!(error = %rb, "counter transaction rollback failed");
                }
                Err(err)
            }
        }
    }

    fn last_committed(
        &self,
        date: NaiveDate,
        seq_type: SequenceType,
    ) -> Result<Option<u64>, StorageError> {
        let key = counter_key(date, seq_type);
        match self.db.get(key.as_bytes()).map_err(map_rocks_err)? {
            Some(raw) => Ok(Some(decode_counter(&key, &raw)?)),
            None => Ok(None),
        }
    }
}

impl ClinicStore for RocksDbClinicStore {
    fn create_patient(
        &self,
        new: NewPatient,
        now: DateTime<Utc>,
    ) -> Result<Patient, FrontdeskError> {
        self.run_txn(|txn| self.insert_patient_tx(txn, &new, now))
    }

    fn list_patients(
        &self,
        query: &PatientQuery,
    ) -> Result<Vec<PatientWithActivity>, FrontdeskError> {
        let mut rows = Vec::new();
        for patient in self.scan_prefix::<Patient>(PATIENT_PREFIX)? {
            if patient.deleted_at.is_some() {
                continue;
            }
            if let Some(id) = query.id {
                if patient.id != id {
                    continue;
                }
            }
            if let Some(name) = &query.name {
                if !contains_ci(&patient.full_name, name) {
                    continue;
                }
            }
            if let Some(dob) = query.dob {
                if patient.date_of_birth != dob {
                    continue;
                }
            }
            if let Some(rm) = &query.rm {
                if !contains_ci(&patient.medical_record_no, rm) {
                    continue;
                }
            }
            let latest_reg_date = self.latest_registration_date(patient.id)?;
            rows.push(PatientWithActivity {
                patient,
                latest_reg_date,
            });
        }

        // Most recently registered first, never-registered patients last.
        rows.sort_by(|a, b| {
            match (a.latest_reg_date, b.latest_reg_date) {
                (Some(x), Some(y)) => y.cmp(&x),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
            .then_with(|| b.patient.created_at.cmp(&a.patient.created_at))
        });
        rows.truncate(query.limit);
        Ok(rows)
    }

    fn update_patient(
        &self,
        id: u64,
        update: PatientUpdate,
        now: DateTime<Utc>,
    ) -> Result<Patient, FrontdeskError> {
        self.run_txn(|txn| {
            let key = patient_key(id);
            let raw = txn
                .get_for_update(key.as_bytes(), true)
                .map_err(map_rocks_err)?
                .ok_or(StorageError::PatientNotFound(id))?;
            let mut patient: Patient = decode_json(&raw)?;

            if patient.deleted_at.is_some() {
                return Err(FrontdeskError::Validation(
                    "Cannot update a soft-deleted patient. Please undo the delete.".into(),
                ));
            }

            if let Some(full_name) = &update.full_name {
                patient.full_name = full_name.clone();
            }
            if let Some(dob) = update.date_of_birth {
                patient.date_of_birth = dob;
            }
            if let Some(phone) = &update.phone {
                patient.phone = phone.clone();
            }
            if let Some(address) = &update.address {
                patient.address = address.clone();
            }
            if let Some(photo_url) = &update.photo_url {
                patient.photo_url = photo_url.clone();
            }
            if let Some(gender) = update.gender {
                patient.gender = gender;
            }
            patient.updated_at = now;

            txn.put(key.as_bytes(), encode_json(&patient)?)
                .map_err(map_rocks_err)?;
            Ok(patient)
        })
    }

    fn set_patient_deleted(
        &self,
        id: u64,
        deleted: bool,
        now: DateTime<Utc>,
    ) -> Result<Patient, FrontdeskError> {
        self.run_txn(|txn| {
            let key = patient_key(id);
            let raw = txn
                .get_for_update(key.as_bytes(), true)
                .map_err(map_rocks_err)?
                .ok_or(StorageError::PatientNotFound(id))?;
            let mut patient: Patient = decode_json(&raw)?;

            patient.deleted_at = if deleted { Some(now) } else { None };
            patient.updated_at = now;

            txn.put(key.as_bytes(), encode_json(&patient)?)
                .map_err(map_rocks_err)?;
            Ok(patient)
        })
    }

    fn delete_patient(&self, id: u64) -> Result<Patient, FrontdeskError> {
        self.run_txn(|txn| {
            let key = patient_key(id);
            let raw = txn
                .get_for_update(key.as_bytes(), true)
                .map_err(map_rocks_err)?
                .ok_or(StorageError::PatientNotFound(id))?;
            let patient: Patient = decode_json(&raw)?;

            // Safe to read committed state here: every registration writer
            // locks the patient row first, so by the time this transaction
            // holds the lock, any referencing patreg: row is committed and
            // visible.
            if !self.registration_ids_for(id)?.is_empty() {
                return Err(StorageError::Conflict(
                    "Cannot delete a patient with existing registrations.".into(),
                )
                .into());
            }

            txn.delete(key.as_bytes()).map_err(map_rocks_err)?;
            txn.delete(patient_code_key(&patient.medical_record_no).as_bytes())
                .map_err(map_rocks_err)?;
            Ok(patient)
        })
    }

    fn create_registration(
        &self,
        new: NewRegistration,
        now: DateTime<Utc>,
    ) -> Result<Registration, FrontdeskError> {
        self.run_txn(|txn| {
            let patient_id = if let Some(inline) = &new.patient {
                self.insert_patient_tx(txn, inline, now)?.id
            } else if let Some(id) = new.patient_id {
                // Exclusive lock on the patient row: a concurrent hard delete
                // must wait for this transaction (and then see the new
                // patreg: row), and a delete that already committed leaves
                // nothing to lock, so no registration can reference a
                // hard-deleted patient.
                let raw = txn
                    .get_for_update(patient_key(id).as_bytes(), true)
                    .map_err(map_rocks_err)?
                    .ok_or(StorageError::PatientNotFound(id))?;
                let patient: Patient = decode_json(&raw)?;
                if patient.deleted_at.is_some() {
                    return Err(StorageError::PatientNotFound(id).into());
                }
                id
            } else {
                return Err(FrontdeskError::Validation(
                    "patientId (or patient) is required.".into(),
                ));
            };

            let code = self.sequence.issue(SequenceType::Registration, now, txn)?;

            let code_key = registration_code_key(&code);
            if txn
                .get_for_update(code_key.as_bytes(), true)
                .map_err(map_rocks_err)?
                .is_some()
            {
                return Err(StorageError::AlreadyExists {
                    entity: "registration",
                    code,
                }
                .into());
            }

            let id = Self::alloc_id(txn, REGISTRATION_ID_KEY)?;
            let registration = Registration {
                id,
                registration_no: code,
                patient_id,
                registration_date: new.registration_date,
                notes: new.notes.clone(),
                created_at: now,
                updated_at: now,
                deleted_at: None,
            };

            txn.put(registration_key(id).as_bytes(), encode_json(&registration)?)
                .map_err(map_rocks_err)?;
            txn.put(code_key.as_bytes(), id.to_be_bytes())
                .map_err(map_rocks_err)?;
            txn.put(patient_regs_key(patient_id, id).as_bytes(), b"")
                .map_err(map_rocks_err)?;

            Ok(registration)
        })
    }

    fn list_registrations(
        &self,
        query: &RegistrationQuery,
    ) -> Result<Vec<RegistrationDetail>, FrontdeskError> {
        let mut rows = Vec::new();
        for registration in self.scan_prefix::<Registration>(REGISTRATION_PREFIX)? {
            let patient = match self.get_patient(registration.patient_id)? {
                Some(p) if p.deleted_at.is_none() => p,
                _ => continue,
            };

            if query.include_deleted {
                // keep both active and soft-deleted registrations
            } else if query.deleted_only {
                if registration.deleted_at.is_none() {
                    continue;
                }
            } else if registration.deleted_at.is_some() {
                continue;
            }

            if let Some(id) = query.id {
                if registration.id != id {
                    continue;
                }
            }

            let queue = query.queue.as_deref().map(str::trim).unwrap_or("");
            if !queue.is_empty() {
                let mut hit = contains_ci(&patient.full_name, queue)
                    || contains_ci(&patient.medical_record_no, queue)
                    || contains_ci(&registration.registration_no, queue);
                if let Ok(dob) = queue.parse::<NaiveDate>() {
                    hit = hit || patient.date_of_birth == dob;
                }
                if !hit {
                    continue;
                }
            } else {
                if let Some(reg) = &query.reg {
                    if !contains_ci(&registration.registration_no, reg) {
                        continue;
                    }
                }
                if let Some(rm) = &query.rm {
                    if !contains_ci(&patient.medical_record_no, rm) {
                        continue;
                    }
                }
                if let Some(name) = &query.name {
                    if !contains_ci(&patient.full_name, name) {
                        continue;
                    }
                }
                if let Some(dob) = query.dob {
                    if patient.date_of_birth != dob {
                        continue;
                    }
                }
            }

            if let Some(start) = query.start {
                if registration.registration_date < start {
                    continue;
                }
            }
            if let Some(end) = query.end {
                if registration.registration_date > end {
                    continue;
                }
            }

            rows.push(RegistrationDetail {
                full_name: patient.full_name,
                medical_record_no: patient.medical_record_no,
                date_of_birth: patient.date_of_birth,
                gender: patient.gender,
                phone: patient.phone,
                address: patient.address,
                registration,
            });
        }

        rows.sort_by(|a, b| {
            b.registration
                .registration_date
                .cmp(&a.registration.registration_date)
                .then_with(|| b.registration.created_at.cmp(&a.registration.created_at))
        });
        rows.truncate(query.limit);
        Ok(rows)
    }

    fn update_registration(
        &self,
        id: u64,
        update: RegistrationUpdate,
        now: DateTime<Utc>,
    ) -> Result<Registration, FrontdeskError> {
        self.run_txn(|txn| {
            let key = registration_key(id);
            let raw = txn
                .get_for_update(key.as_bytes(), true)
                .map_err(map_rocks_err)?
                .ok_or(StorageError::RegistrationNotFound(id))?;
            let mut registration: Registration = decode_json(&raw)?;

            if registration.deleted_at.is_some() {
                return Err(FrontdeskError::Validation(
                    "Registration is already deleted.".into(),
                ));
            }

            if let Some(patient_id) = update.patient_id {
                // Locked for the same reason as in create_registration: the
                // reassignment must not race a hard delete of the target.
                let raw = txn
                    .get_for_update(patient_key(patient_id).as_bytes(), true)
                    .map_err(map_rocks_err)?
                    .ok_or(StorageError::PatientNotFound(patient_id))?;
                let patient: Patient = decode_json(&raw)?;
                if patient.deleted_at.is_some() {
                    return Err(StorageError::PatientNotFound(patient_id).into());
                }
                if patient_id != registration.patient_id {
                    txn.delete(patient_regs_key(registration.patient_id, id).as_bytes())
                        .map_err(map_rocks_err)?;
                    txn.put(patient_regs_key(patient_id, id).as_bytes(), b"")
                        .map_err(map_rocks_err)?;
                    registration.patient_id = patient_id;
                }
            }
            if let Some(date) = update.registration_date {
                registration.registration_date = date;
            }
            if let Some(notes) = &update.notes {
                registration.notes = notes.clone();
            }
            registration.updated_at = now;

            txn.put(key.as_bytes(), encode_json(&registration)?)
                .map_err(map_rocks_err)?;
            Ok(registration)
        })
    }

    fn set_registration_deleted(
        &self,
        id: u64,
        deleted: bool,
        now: DateTime<Utc>,
    ) -> Result<Registration, FrontdeskError> {
        self.run_txn(|txn| {
            let key = registration_key(id);
            let raw = txn
                .get_for_update(key.as_bytes(), true)
                .map_err(map_rocks_err)?
                .ok_or(StorageError::RegistrationNotFound(id))?;
            let mut registration: Registration = decode_json(&raw)?;

            let patient = self
                .get_patient(registration.patient_id)?
                .ok_or(StorageError::PatientNotFound(registration.patient_id))?;
            if patient.deleted_at.is_some() {
                return Err(StorageError::PatientNotFound(registration.patient_id).into());
            }

            registration.deleted_at = if deleted { Some(now) } else { None };
            registration.updated_at = now;

            txn.put(key.as_bytes(), encode_json(&registration)?)
                .map_err(map_rocks_err)?;
            Ok(registration)
        })
    }

    fn delete_registration(&self, id: u64) -> Result<Registration, FrontdeskError> {
        self.run_txn(|txn| {
            let key = registration_key(id);
            let raw = txn
                .get_for_update(key.as_bytes(), true)
                .map_err(map_rocks_err)?
                .ok_or(StorageError::RegistrationNotFound(id))?;
            let registration: Registration = decode_json(&raw)?;

            txn.delete(key.as_bytes()).map_err(map_rocks_err)?;
            txn.delete(registration_code_key(&registration.registration_no).as_bytes())
                .map_err(map_rocks_err)?;
            txn.delete(patient_regs_key(registration.patient_id, id).as_bytes())
                .map_err(map_rocks_err)?;
            Ok(registration)
        })
    }

    fn stats(&self, today: NaiveDate) -> Result<ClinicStats, FrontdeskError> {
        let patients: Vec<Patient> = self.scan_prefix(PATIENT_PREFIX)?;
        let registrations: Vec<Registration> = self.scan_prefix(REGISTRATION_PREFIX)?;

        let active_patients: Vec<&Patient> =
            patients.iter().filter(|p| p.deleted_at.is_none()).collect();
        let active_regs: Vec<&Registration> = registrations
            .iter()
            .filter(|r| r.deleted_at.is_none())
            .collect();

        let today_registrations = active_regs
            .iter()
            .filter(|r| r.registration_date == today)
            .count() as u64;

        let mut recent: Vec<&Registration> = active_regs.clone();
        recent.sort_by(|a, b| {
            b.registration_date
                .cmp(&a.registration_date)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        let mut recent_activity = Vec::new();
        for reg in recent.into_iter().take(5) {
            if let Some(patient) = self.get_patient(reg.patient_id)? {
                recent_activity.push(RegistrationSummary {
                    id: reg.id,
                    registration_no: reg.registration_no.clone(),
                    registration_date: reg.registration_date,
                    full_name: patient.full_name,
                    medical_record_no: patient.medical_record_no,
                });
            }
        }

        let mut newest = active_patients.clone();
        newest.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let latest_patients = newest
            .into_iter()
            .take(5)
            .map(|p| PatientSummary {
                id: p.id,
                full_name: p.full_name.clone(),
                medical_record_no: p.medical_record_no.clone(),
                created_at: p.created_at,
            })
            .collect();

        Ok(ClinicStats {
            total_patients: active_patients.len() as u64,
            total_registrations: active_regs.len() as u64,
            today_registrations,
            recent_activity,
            latest_patients,
        })
    }
}
