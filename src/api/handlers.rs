use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::contracts::{
    ClinicStats, ClinicStore, FrontdeskError, Gender, NewPatient, NewRegistration, Patient,
    PatientQuery, PatientUpdate, PatientWithActivity, Registration, RegistrationDetail,
    RegistrationQuery, RegistrationUpdate, SequenceError, StorageError,
};
use crate::metrics::MetricsRegistry;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 200;

/// Application state shared across handlers.
pub struct AppState<S: ClinicStore> {
    pub store: Arc<S>,
    pub metrics: Arc<MetricsRegistry>,
    /// Expected `x-api-key` value. `None` means no key is configured and
    /// every protected request is rejected.
    pub api_secret: Option<String>,
}

impl<S: ClinicStore> AppState<S> {
    pub fn new(store: Arc<S>, metrics: Arc<MetricsRegistry>, api_secret: Option<String>) -> Self {
        Self {
            store,
            metrics,
            api_secret,
        }
    }
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// API error type.
pub enum ApiError {
    Core(FrontdeskError),
    Unauthorized,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse {
                    error: "Unauthorized".into(),
                    code: "UNAUTHORIZED".into(),
                },
            ),
            ApiError::Core(FrontdeskError::Validation(msg)) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: msg,
                    code: "VALIDATION_ERROR".into(),
                },
            ),
            ApiError::Core(FrontdeskError::Storage(StorageError::PatientNotFound(id))) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: format!("Patient not found: {}", id),
                    code: "PATIENT_NOT_FOUND".into(),
                },
            ),
            ApiError::Core(FrontdeskError::Storage(StorageError::RegistrationNotFound(id))) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: format!("Registration not found: {}", id),
                    code: "REGISTRATION_NOT_FOUND".into(),
                },
            ),
            ApiError::Core(FrontdeskError::Storage(StorageError::AlreadyExists {
                entity,
                code,
            })) => (
                StatusCode::CONFLICT,
                ErrorResponse {
                    error: format!("A {} with code {} already exists", entity, code),
                    code: "DUPLICATE_CODE".into(),
                },
            ),
            ApiError::Core(FrontdeskError::Storage(StorageError::Conflict(msg))) => (
                StatusCode::CONFLICT,
                ErrorResponse {
                    error: msg,
                    code: "CONFLICT".into(),
                },
            ),
            ApiError::Core(FrontdeskError::Storage(StorageError::LockConflict(msg)))
            | ApiError::Core(FrontdeskError::Sequence(SequenceError::Storage(
                StorageError::LockConflict(msg),
            ))) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    error: msg,
                    code: "LOCK_TIMEOUT".into(),
                },
            ),
            ApiError::Core(FrontdeskError::Sequence(e @ SequenceError::Overflow { .. })) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: e.to_string(),
                    code: "SEQUENCE_EXHAUSTED".into(),
                },
            ),
            ApiError::Core(FrontdeskError::Sequence(SequenceError::InvalidType(t))) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: format!("Unknown sequence type: {}", t),
                    code: "INVALID_SEQUENCE_TYPE".into(),
                },
            ),
            ApiError::Core(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: e.to_string(),
                    code: "STORAGE_ERROR".into(),
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<FrontdeskError> for ApiError {
    fn from(e: FrontdeskError) -> Self {
        ApiError::Core(e)
    }
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    ApiError::Core(FrontdeskError::Validation(msg.into()))
}

/// Records the error counter before converting a store failure, so every
/// failed request shows up in /metrics.
fn store_error<S: ClinicStore>(state: &AppState<S>, err: FrontdeskError) -> ApiError {
    state.metrics.api.record_error();
    if matches!(
        err,
        FrontdeskError::Sequence(SequenceError::Overflow { .. })
    ) {
        state.metrics.sequence.record_overflow();
    }
    ApiError::Core(err)
}

/// Middleware guarding every route except /health. Requests must carry the
/// configured secret in `x-api-key`; a server without a configured secret
/// rejects everything rather than failing open.
pub async fn require_api_key<S: ClinicStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());

    let authorized = match (&state.api_secret, provided) {
        (Some(secret), Some(key)) => key == secret,
        _ => false,
    };

    if !authorized {
        state.metrics.api.record_auth_rejection();
        return ApiError::Unauthorized.into_response();
    }

    next.run(request).await
}

/// Deserializes a nullable PATCH-style field: absent means "leave unchanged",
/// explicit null means "clear".
fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

// ============================================================================
// Patients
// ============================================================================

/// Request body for creating a patient. Also used inline inside registration
/// creation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePatientRequest {
    pub full_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub photo_url: Option<String>,
    pub gender: Option<String>,
}

impl CreatePatientRequest {
    /// Validates required fields and enumerations, producing the store-level
    /// value or a 400 with a field-specific message.
    fn validate(self) -> Result<NewPatient, ApiError> {
        let full_name = self
            .full_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| bad_request("fullName is required."))?
            .to_string();
        let date_of_birth = self
            .date_of_birth
            .ok_or_else(|| bad_request("dateOfBirth is required."))?;
        let gender = match self.gender.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                Gender::parse(raw).ok_or_else(|| bad_request("gender must be Male or Female."))?,
            ),
            None => None,
        };

        Ok(NewPatient {
            full_name,
            date_of_birth,
            phone: self.phone.filter(|s| !s.trim().is_empty()),
            address: self.address.filter(|s| !s.trim().is_empty()),
            photo_url: self.photo_url.filter(|s| !s.trim().is_empty()),
            gender,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePatientRequest {
    pub id: Option<u64>,
    pub full_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default, deserialize_with = "double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub photo_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub gender: Option<Option<String>>,
}

/// Request body for soft-deleting or restoring a record.
#[derive(Debug, Deserialize)]
pub struct SetDeletedRequest {
    pub id: Option<u64>,
    pub deleted: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct IdQuery {
    pub id: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PatientListQuery {
    pub id: Option<u64>,
    pub name: Option<String>,
    pub dob: Option<NaiveDate>,
    pub rm: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct PatientListResponse {
    pub patients: Vec<PatientWithActivity>,
    pub count: usize,
}

fn require_id(id: Option<u64>) -> Result<u64, ApiError> {
    match id {
        Some(id) if id > 0 => Ok(id),
        _ => Err(bad_request("A valid id is required.")),
    }
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// POST /patients
pub async fn create_patient<S: ClinicStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(request): Json<CreatePatientRequest>,
) -> Result<(StatusCode, Json<Patient>), ApiError> {
    let start = Instant::now();
    let new = request.validate()?;

    let patient = state
        .store
        .create_patient(new, Utc::now())
        .map_err(|e| store_error(&state, e))?;

    state
        .metrics
        .api
        .record_write("/patients", start.elapsed().as_micros() as u64);
    state.metrics.sequence.record_issued("RM");

    tracing::info!(
        id = patient.id,
        medical_record_no = %patient.medical_record_no,
        "created patient"
    );

    Ok((StatusCode::CREATED, Json(patient)))
}

/// GET /patients
pub async fn list_patients<S: ClinicStore>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<PatientListQuery>,
) -> Result<Json<PatientListResponse>, ApiError> {
    let start = Instant::now();

    if query.id == Some(0) {
        return Err(bad_request("A valid id is required."));
    }

    let patients = state
        .store
        .list_patients(&PatientQuery {
            id: query.id,
            name: query.name.filter(|s| !s.trim().is_empty()),
            dob: query.dob,
            rm: query.rm.filter(|s| !s.trim().is_empty()),
            limit: clamp_limit(query.limit),
        })
        .map_err(|e| store_error(&state, e))?;

    state
        .metrics
        .api
        .record_read("/patients", start.elapsed().as_micros() as u64);

    let count = patients.len();
    Ok(Json(PatientListResponse { patients, count }))
}

/// PUT /patients
pub async fn update_patient<S: ClinicStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(request): Json<UpdatePatientRequest>,
) -> Result<Json<Patient>, ApiError> {
    let start = Instant::now();
    let id = require_id(request.id)?;

    let gender = match request.gender {
        Some(Some(raw)) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                Some(None)
            } else {
                Some(Some(Gender::parse(trimmed).ok_or_else(|| {
                    bad_request("gender must be Male or Female.")
                })?))
            }
        }
        Some(None) => Some(None),
        None => None,
    };

    let update = PatientUpdate {
        full_name: request
            .full_name
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        date_of_birth: request.date_of_birth,
        phone: request.phone,
        address: request.address,
        photo_url: request.photo_url,
        gender,
    };

    if update.is_empty() {
        return Err(bad_request("No fields to update."));
    }

    let patient = state
        .store
        .update_patient(id, update, Utc::now())
        .map_err(|e| store_error(&state, e))?;

    state
        .metrics
        .api
        .record_write("/patients", start.elapsed().as_micros() as u64);

    Ok(Json(patient))
}

/// PATCH /patients
pub async fn patch_patient<S: ClinicStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(request): Json<SetDeletedRequest>,
) -> Result<Json<Patient>, ApiError> {
    let start = Instant::now();
    let id = require_id(request.id)?;
    let deleted = request
        .deleted
        .ok_or_else(|| bad_request("deleted is required."))?;

    let patient = state
        .store
        .set_patient_deleted(id, deleted, Utc::now())
        .map_err(|e| store_error(&state, e))?;

    state
        .metrics
        .api
        .record_write("/patients", start.elapsed().as_micros() as u64);

    Ok(Json(patient))
}

/// DELETE /patients?id=N
pub async fn delete_patient<S: ClinicStore>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<IdQuery>,
) -> Result<Json<Patient>, ApiError> {
    let start = Instant::now();
    let id = require_id(query.id)?;

    let patient = state
        .store
        .delete_patient(id)
        .map_err(|e| store_error(&state, e))?;

    state
        .metrics
        .api
        .record_write("/patients", start.elapsed().as_micros() as u64);

    tracing::info!(id, "hard-deleted patient");

    Ok(Json(patient))
}

// ============================================================================
// Registrations
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRegistrationRequest {
    pub patient_id: Option<u64>,
    pub patient: Option<CreatePatientRequest>,
    pub registration_date: Option<NaiveDate>,
    pub notes: Option<String>,
    /// Always server-assigned; any client-supplied value is rejected.
    pub registration_no: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRegistrationRequest {
    pub id: Option<u64>,
    pub patient_id: Option<u64>,
    pub registration_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationListQuery {
    pub id: Option<u64>,
    /// Unified search across name, medical record number, registration
    /// number, and date of birth.
    pub queue: Option<String>,
    pub reg: Option<String>,
    pub rm: Option<String>,
    pub name: Option<String>,
    pub dob: Option<NaiveDate>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    #[serde(default)]
    pub deleted_only: bool,
    #[serde(default)]
    pub include_deleted: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RegistrationListResponse {
    pub registrations: Vec<RegistrationDetail>,
    pub count: usize,
}

/// POST /registrations
pub async fn create_registration<S: ClinicStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(request): Json<CreateRegistrationRequest>,
) -> Result<(StatusCode, Json<Registration>), ApiError> {
    let start = Instant::now();

    if request.registration_no.is_some() {
        return Err(bad_request("registrationNo is assigned by the server."));
    }

    let now = Utc::now();
    let registration_date = request
        .registration_date
        .ok_or_else(|| bad_request("registrationDate is required."))?;
    let inline_patient = request.patient.map(CreatePatientRequest::validate).transpose()?;
    if inline_patient.is_none() && request.patient_id.is_none() {
        return Err(bad_request("patientId (or patient) is required."));
    }
    let created_inline = inline_patient.is_some();

    let registration = state
        .store
        .create_registration(
            NewRegistration {
                patient_id: request.patient_id,
                patient: inline_patient,
                registration_date,
                notes: request.notes.filter(|s| !s.trim().is_empty()),
            },
            now,
        )
        .map_err(|e| store_error(&state, e))?;

    state
        .metrics
        .api
        .record_write("/registrations", start.elapsed().as_micros() as u64);
    state.metrics.sequence.record_issued("REG");
    if created_inline {
        state.metrics.sequence.record_issued("RM");
    }

    tracing::info!(
        id = registration.id,
        registration_no = %registration.registration_no,
        patient_id = registration.patient_id,
        "created registration"
    );

    Ok((StatusCode::CREATED, Json(registration)))
}

/// GET /registrations
pub async fn list_registrations<S: ClinicStore>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<RegistrationListQuery>,
) -> Result<Json<RegistrationListResponse>, ApiError> {
    let start = Instant::now();

    if query.id == Some(0) {
        return Err(bad_request("A valid id is required."));
    }

    let registrations = state
        .store
        .list_registrations(&RegistrationQuery {
            id: query.id,
            queue: query.queue.filter(|s| !s.trim().is_empty()),
            reg: query.reg.filter(|s| !s.trim().is_empty()),
            rm: query.rm.filter(|s| !s.trim().is_empty()),
            name: query.name.filter(|s| !s.trim().is_empty()),
            dob: query.dob,
            start: query.start,
            end: query.end,
            deleted_only: query.deleted_only,
            include_deleted: query.include_deleted,
            limit: clamp_limit(query.limit),
        })
        .map_err(|e| store_error(&state, e))?;

    state
        .metrics
        .api
        .record_read("/registrations", start.elapsed().as_micros() as u64);

    let count = registrations.len();
    Ok(Json(RegistrationListResponse {
        registrations,
        count,
    }))
}

/// PUT /registrations
pub async fn update_registration<S: ClinicStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(request): Json<UpdateRegistrationRequest>,
) -> Result<Json<Registration>, ApiError> {
    let start = Instant::now();
    let id = require_id(request.id)?;

    if let Some(0) = request.patient_id {
        return Err(bad_request("A valid patientId is required."));
    }

    let update = RegistrationUpdate {
        patient_id: request.patient_id,
        registration_date: request.registration_date,
        notes: request.notes,
    };

    if update.is_empty() {
        return Err(bad_request("No fields to update."));
    }

    let registration = state
        .store
        .update_registration(id, update, Utc::now())
        .map_err(|e| store_error(&state, e))?;

    state
        .metrics
        .api
        .record_write("/registrations", start.elapsed().as_micros() as u64);

    Ok(Json(registration))
}

/// PATCH /registrations
pub async fn patch_registration<S: ClinicStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(request): Json<SetDeletedRequest>,
) -> Result<Json<Registration>, ApiError> {
    let start = Instant::now();
    let id = require_id(request.id)?;
    let deleted = request
        .deleted
        .ok_or_else(|| bad_request("deleted is required."))?;

    let registration = state
        .store
        .set_registration_deleted(id, deleted, Utc::now())
        .map_err(|e| store_error(&state, e))?;

    state
        .metrics
        .api
        .record_write("/registrations", start.elapsed().as_micros() as u64);

    Ok(Json(registration))
}

/// DELETE /registrations?id=N
pub async fn delete_registration<S: ClinicStore>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<IdQuery>,
) -> Result<Json<Registration>, ApiError> {
    let start = Instant::now();
    let id = require_id(query.id)?;

    let registration = state
        .store
        .delete_registration(id)
        .map_err(|e| store_error(&state, e))?;

    state
        .metrics
        .api
        .record_write("/registrations", start.elapsed().as_micros() as u64);

    tracing::info!(id, "hard-deleted registration");

    Ok(Json(registration))
}

// ============================================================================
// Stats, metrics, health
// ============================================================================

/// GET /stats
pub async fn get_stats<S: ClinicStore>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<ClinicStats>, ApiError> {
    let start = Instant::now();

    let stats = state
        .store
        .stats(Utc::now().date_naive())
        .map_err(|e| store_error(&state, e))?;

    state
        .metrics
        .api
        .record_read("/stats", start.elapsed().as_micros() as u64);

    Ok(Json(stats))
}

/// GET /metrics
/// Prometheus exposition format.
pub async fn get_metrics<S: ClinicStore>(State(state): State<Arc<AppState<S>>>) -> Response {
    let body = state.metrics.format_prometheus();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

/// GET /health
/// Unauthenticated liveness probe.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
