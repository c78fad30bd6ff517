mod handlers;

use std::future::Future;
use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::Router;

use crate::contracts::ClinicStore;

pub use handlers::{
    AppState, CreatePatientRequest, CreateRegistrationRequest, ErrorResponse, PatientListResponse,
    RegistrationListResponse, SetDeletedRequest, UpdatePatientRequest, UpdateRegistrationRequest,
};

/// Creates the API router.
///
/// Every route except /health sits behind the x-api-key middleware.
pub fn create_router<S: ClinicStore + 'static>(state: Arc<AppState<S>>) -> Router {
    let protected = Router::new()
        .route(
            "/patients",
            get(handlers::list_patients::<S>)
                .post(handlers::create_patient::<S>)
                .put(handlers::update_patient::<S>)
                .patch(handlers::patch_patient::<S>)
                .delete(handlers::delete_patient::<S>),
        )
        .route(
            "/registrations",
            get(handlers::list_registrations::<S>)
                .post(handlers::create_registration::<S>)
                .put(handlers::update_registration::<S>)
                .patch(handlers::patch_registration::<S>)
                .delete(handlers::delete_registration::<S>),
        )
        .route("/stats", get(handlers::get_stats::<S>))
        .route("/metrics", get(handlers::get_metrics::<S>))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::require_api_key::<S>,
        ));

    Router::new()
        .route("/health", get(handlers::health_check))
        .merge(protected)
        .with_state(state)
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// Creates a config from environment variables.
    ///
    /// Reads:
    /// - `FRONTDESK_HOST`: Bind address (default: 0.0.0.0)
    /// - `FRONTDESK_PORT`: Listen port (default: 8080)
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            host: std::env::var("FRONTDESK_HOST").unwrap_or(default.host),
            port: std::env::var("FRONTDESK_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.port),
        }
    }
}

/// Starts the HTTP server.
pub async fn start_server<S, F>(
    config: ServerConfig,
    state: Arc<AppState<S>>,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: ClinicStore + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
