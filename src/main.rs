use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use pwa_android_builder::app_state::AppState;
use pwa_android_builder::config::AppConfig;
use pwa_android_builder::db::{self, PgStore};
use pwa_android_builder::routes;
use pwa_android_builder::services::{
    artifacts::ArtifactStore,
    encryption::CredentialCipher,
    fetch::ResilientFetch,
    pipeline::AndroidPipeline,
    scheduler::Scheduler,
    signing::IdentityCache,
    toolchain::{CommandToolchain, KeytoolGenerator},
};

/// Create a data directory and return its absolute form.
async fn prepare_dir(path: &Path) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(path).await?;
    tokio::fs::canonicalize(path).await
}

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing pwa-android-builder");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    let output_root = prepare_dir(&config.output_root)
        .await
        .expect("Failed to prepare output directory");
    let workspace_root = prepare_dir(&config.workspace_root)
        .await
        .expect("Failed to prepare workspace directory");
    let keystore_root = prepare_dir(&config.keystore_root)
        .await
        .expect("Failed to prepare keystore directory");

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let cipher = CredentialCipher::new(&config.credential_key)
        .expect("Failed to initialize credential cipher");
    let store = Arc::new(PgStore::new(db_pool, cipher));

    let identities = Arc::new(IdentityCache::new(
        store.clone(),
        Arc::new(KeytoolGenerator::new(config.keytool_path.clone())),
        keystore_root,
        config.signing_subject(),
    ));
    let fetch =
        ResilientFetch::new(&config.fetch_settings()).expect("Failed to initialize HTTP client");
    let artifacts = ArtifactStore::new(output_root);
    let pipeline = AndroidPipeline::new(
        fetch,
        Arc::new(CommandToolchain::new(config.toolchain_settings())),
        identities,
        artifacts.clone(),
        workspace_root.clone(),
    );

    let scheduler = Arc::new(Scheduler::start(
        store.clone(),
        Arc::new(pipeline),
        &config.scheduler_settings(),
    ));

    // Settle jobs left behind by a previous process before taking new ones.
    scheduler
        .recover()
        .await
        .expect("Failed to recover jobs from previous run");

    let state = AppState::new(store, scheduler, artifacts, workspace_root);
    let app = routes::router(state, &config.http_settings()).route(
        "/metrics",
        get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
    );

    tracing::info!("Starting pwa-android-builder on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
