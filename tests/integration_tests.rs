//! HTTP API integration tests, driven through the router with tower's
//! `oneshot` so no socket is bound.
//!
//! Run with: cargo test --test integration_tests

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use tempfile::TempDir;
use tower::ServiceExt;

use frontdesk::api::{create_router, AppState};
use frontdesk::metrics::MetricsRegistry;
use frontdesk::storage::{RocksDbClinicStore, SequenceFormat};

const API_KEY: &str = "test-secret";

fn create_test_app() -> (Router, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RocksDbClinicStore::open(dir.path(), SequenceFormat::default()).unwrap());
    let state = Arc::new(AppState::new(
        store,
        Arc::new(MetricsRegistry::new()),
        Some(API_KEY.into()),
    ));
    (create_router(state), dir)
}

fn authed(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", API_KEY)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn authed_get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("x-api-key", API_KEY)
        .body(Body::empty())
        .unwrap()
}

fn today() -> String {
    Utc::now().date_naive().to_string()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn create_patient(app: &Router, name: &str) -> serde_json::Value {
    let response = app
        .clone()
        .oneshot(authed(
            "POST",
            "/patients",
            serde_json::json!({ "fullName": name, "dateOfBirth": "1990-01-01" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    json_body(response).await
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn requests_without_api_key_are_rejected() {
    let (app, _dir) = create_test_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/patients")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/patients")
                .header("x-api-key", "wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_is_unauthenticated() {
    let (app, _dir) = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Patients
// =============================================================================

#[tokio::test]
async fn create_patient_issues_a_medical_record_number() {
    let (app, _dir) = create_test_app();

    let patient = create_patient(&app, "Siti Rahma").await;

    let code = patient["medical_record_no"].as_str().unwrap();
    let prefix = Utc::now().date_naive().format("%y%m%d").to_string();
    assert_eq!(code.len(), 9);
    assert!(code.starts_with(&prefix));
    assert!(code.ends_with("001"));
    assert_eq!(patient["full_name"], "Siti Rahma");
    assert!(patient["deleted_at"].is_null());
}

#[tokio::test]
async fn create_patient_requires_full_name() {
    let (app, _dir) = create_test_app();

    let response = app
        .oneshot(authed(
            "POST",
            "/patients",
            serde_json::json!({ "dateOfBirth": "1990-01-01" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn create_patient_rejects_unknown_gender() {
    let (app, _dir) = create_test_app();

    let response = app
        .oneshot(authed(
            "POST",
            "/patients",
            serde_json::json!({
                "fullName": "Budi Santoso",
                "dateOfBirth": "1990-01-01",
                "gender": "Other"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_patients_filters_by_name() {
    let (app, _dir) = create_test_app();
    create_patient(&app, "Siti Rahma").await;
    create_patient(&app, "Budi Santoso").await;

    let response = app
        .oneshot(authed_get("/patients?name=siti"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["patients"][0]["full_name"], "Siti Rahma");
}

#[tokio::test]
async fn update_patient_rejects_empty_update() {
    let (app, _dir) = create_test_app();
    let patient = create_patient(&app, "Siti Rahma").await;

    let response = app
        .oneshot(authed(
            "PUT",
            "/patients",
            serde_json::json!({ "id": patient["id"] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn soft_deleted_patients_disappear_from_listings() {
    let (app, _dir) = create_test_app();
    let patient = create_patient(&app, "Siti Rahma").await;

    let response = app
        .clone()
        .oneshot(authed(
            "PATCH",
            "/patients",
            serde_json::json!({ "id": patient["id"], "deleted": true }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(authed_get("/patients")).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["count"], 0);

    // Restore and it comes back
    let response = app
        .clone()
        .oneshot(authed(
            "PATCH",
            "/patients",
            serde_json::json!({ "id": patient["id"], "deleted": false }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(authed_get("/patients")).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn soft_deleted_patients_cannot_be_updated() {
    let (app, _dir) = create_test_app();
    let patient = create_patient(&app, "Siti Rahma").await;

    app.clone()
        .oneshot(authed(
            "PATCH",
            "/patients",
            serde_json::json!({ "id": patient["id"], "deleted": true }),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(authed(
            "PUT",
            "/patients",
            serde_json::json!({ "id": patient["id"], "fullName": "New Name" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Registrations
// =============================================================================

#[tokio::test]
async fn create_registration_for_existing_patient() {
    let (app, _dir) = create_test_app();
    let patient = create_patient(&app, "Siti Rahma").await;

    let response = app
        .oneshot(authed(
            "POST",
            "/registrations",
            serde_json::json!({ "patientId": patient["id"], "registrationDate": today() }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let registration = json_body(response).await;
    let code = registration["registration_no"].as_str().unwrap();
    assert_eq!(code.len(), 12);
    assert!(code.ends_with("000001"));
    assert_eq!(registration["patient_id"], patient["id"]);
}

#[tokio::test]
async fn create_registration_with_inline_patient() {
    let (app, _dir) = create_test_app();

    let response = app
        .clone()
        .oneshot(authed(
            "POST",
            "/registrations",
            serde_json::json!({
                "patient": { "fullName": "Walk-in Patient", "dateOfBirth": "2000-06-15" },
                "registrationDate": today()
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // The inline patient got its own medical record number
    let response = app.oneshot(authed_get("/patients")).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(
        body["patients"][0]["medical_record_no"]
            .as_str()
            .unwrap()
            .len(),
        9
    );
}

#[tokio::test]
async fn create_registration_requires_a_patient() {
    let (app, _dir) = create_test_app();

    let response = app
        .clone()
        .oneshot(authed(
            "POST",
            "/registrations",
            serde_json::json!({ "registrationDate": today() }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(authed(
            "POST",
            "/registrations",
            serde_json::json!({ "patientId": 9999, "registrationDate": today() }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_registration_requires_a_date() {
    let (app, _dir) = create_test_app();
    let patient = create_patient(&app, "Siti Rahma").await;

    let response = app
        .oneshot(authed(
            "POST",
            "/registrations",
            serde_json::json!({ "patientId": patient["id"] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"], "registrationDate is required.");
}

#[tokio::test]
async fn client_supplied_registration_no_is_rejected() {
    let (app, _dir) = create_test_app();
    let patient = create_patient(&app, "Siti Rahma").await;

    let response = app
        .oneshot(authed(
            "POST",
            "/registrations",
            serde_json::json!({
                "patientId": patient["id"],
                "registrationDate": today(),
                "registrationNo": "251212000099"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn registration_listing_joins_patient_fields() {
    let (app, _dir) = create_test_app();
    let patient = create_patient(&app, "Siti Rahma").await;

    app.clone()
        .oneshot(authed(
            "POST",
            "/registrations",
            serde_json::json!({ "patientId": patient["id"], "registrationDate": today() }),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(authed_get("/registrations?queue=siti"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["registrations"][0]["full_name"], "Siti Rahma");
    assert_eq!(
        body["registrations"][0]["medical_record_no"],
        patient["medical_record_no"]
    );
}

#[tokio::test]
async fn deleted_only_listing_shows_soft_deleted_registrations() {
    let (app, _dir) = create_test_app();
    let patient = create_patient(&app, "Siti Rahma").await;

    let response = app
        .clone()
        .oneshot(authed(
            "POST",
            "/registrations",
            serde_json::json!({ "patientId": patient["id"], "registrationDate": today() }),
        ))
        .await
        .unwrap();
    let registration = json_body(response).await;

    app.clone()
        .oneshot(authed(
            "PATCH",
            "/registrations",
            serde_json::json!({ "id": registration["id"], "deleted": true }),
        ))
        .await
        .unwrap();

    let response = app.clone().oneshot(authed_get("/registrations")).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["count"], 0);

    let response = app
        .oneshot(authed_get("/registrations?deletedOnly=true"))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn deleting_a_patient_with_registrations_conflicts() {
    let (app, _dir) = create_test_app();
    let patient = create_patient(&app, "Siti Rahma").await;

    app.clone()
        .oneshot(authed(
            "POST",
            "/registrations",
            serde_json::json!({ "patientId": patient["id"], "registrationDate": today() }),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/patients?id={}", patient["id"]))
                .header("x-api-key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body = json_body(response).await;
    assert_eq!(body["code"], "CONFLICT");
}

// =============================================================================
// Stats and metrics
// =============================================================================

#[tokio::test]
async fn stats_reflect_todays_activity() {
    let (app, _dir) = create_test_app();
    let patient = create_patient(&app, "Siti Rahma").await;

    app.clone()
        .oneshot(authed(
            "POST",
            "/registrations",
            serde_json::json!({ "patientId": patient["id"], "registrationDate": today() }),
        ))
        .await
        .unwrap();

    let response = app.oneshot(authed_get("/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["total_patients"], 1);
    assert_eq!(body["total_registrations"], 1);
    assert_eq!(body["today_registrations"], 1);
    assert_eq!(body["recent_activity"].as_array().unwrap().len(), 1);
    assert_eq!(body["latest_patients"][0]["full_name"], "Siti Rahma");
}

#[tokio::test]
async fn metrics_endpoint_exposes_prometheus_text() {
    let (app, _dir) = create_test_app();
    create_patient(&app, "Siti Rahma").await;

    let response = app.oneshot(authed_get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("frontdesk_sequence_issued_total{type=\"RM\"} 1"));
    assert!(text.contains("frontdesk_write_latency_us_count"));
}
