use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use frontdesk::api::{start_server, AppState, ServerConfig};
use frontdesk::metrics::MetricsRegistry;
use frontdesk::storage::{RetryConfig, RocksDbClinicStore, SequenceFormat};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("frontdesk=info".parse()?))
        .init();

    tracing::info!("Front desk service starting...");

    let metrics = Arc::new(MetricsRegistry::new());

    let data_dir = std::env::var("FRONTDESK_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let store = Arc::new(
        RocksDbClinicStore::open(&data_dir, SequenceFormat::from_env())?
            .with_retry_config(RetryConfig::from_env())
            .with_sequence_metrics(Arc::clone(&metrics.sequence)),
    );
    tracing::info!("Opened RocksDB at {}", data_dir);

    let api_secret = std::env::var("FRONTDESK_API_SECRET").ok();
    if api_secret.is_none() {
        tracing::warn!("FRONTDESK_API_SECRET is not set; all protected requests will be rejected");
    }

    let state = Arc::new(AppState::new(store, metrics, api_secret));

    let config = ServerConfig::from_env();

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
        tracing::info!("Shutting down");
    };

    start_server(config, state, shutdown).await?;

    Ok(())
}
