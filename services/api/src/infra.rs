use escola::config::AppConfig;
use escola::error::AppError;
use escola::store::SqliteStore;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Connect to the configured database and bring its schema up to date.
pub(crate) async fn open_store(config: &AppConfig) -> Result<Arc<SqliteStore>, AppError> {
    let store =
        SqliteStore::connect(&config.database.url, config.database.max_connections).await?;
    store.migrate().await?;
    debug!(
        url = %config.database.url,
        max_connections = config.database.max_connections,
        "sqlite store ready"
    );
    Ok(Arc::new(store))
}
