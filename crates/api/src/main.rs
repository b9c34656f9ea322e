use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use melon_api::background::job_retention;
use melon_api::config::ServerConfig;
use melon_api::router::build_app_router;
use melon_api::state::AppState;
use melon_api::ws;
use melon_core::job::JobKind;
use melon_core::storage::{LocalStorage, Storage};
use melon_pipeline::manifest::ModelManifest;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "melon_api=debug,melon_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let pool = melon_db::create_pool(&config.database_url)
        .await
        .expect("Failed to open database");
    melon_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    melon_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!(url = %config.database_url, "Database ready");

    // --- Storage and models ---
    let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(config.storage_root.clone()));
    let manifest = match &config.model_manifest {
        Some(path) => ModelManifest::load(path)
            .await
            .expect("Failed to load model manifest"),
        None => {
            tracing::warn!("MODEL_MANIFEST not set; no models or feature extractor registered");
            ModelManifest::default()
        }
    };

    // --- App state ---
    let state = AppState::build(pool, config.clone(), storage, manifest.feature_extractor());
    for model in manifest.models() {
        state
            .registry
            .register(model)
            .await
            .expect("Failed to register model");
    }

    let interrupted = state
        .runner
        .recover_interrupted()
        .await
        .expect("Failed to recover interrupted jobs");
    if interrupted > 0 {
        tracing::warn!(interrupted, "Jobs from a previous run were marked failed");
    }
    match state.index.refresh().await {
        Ok(report) => tracing::info!(
            added = report.added,
            removed = report.removed,
            total = report.total,
            "Dataset index refreshed at startup"
        ),
        Err(e) => tracing::warn!(error = %e, "Initial dataset refresh failed"),
    }

    // --- Background tasks ---
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&state.ws_manager));

    let retention_cancel = CancellationToken::new();
    let retention_handle = tokio::spawn(job_retention::run(
        Arc::clone(&state.runner),
        config.job_retention(),
        job_retention::CLEANUP_INTERVAL,
        retention_cancel.clone(),
    ));

    let runner = Arc::clone(&state.runner);
    let ws_manager = Arc::clone(&state.ws_manager);
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    runner.cancel_all();
    let drain = async {
        while JobKind::ALL.iter().any(|k| runner.running_job(*k).is_some()) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(config.shutdown_timeout_secs), drain)
        .await
        .is_err()
    {
        tracing::warn!("Jobs still running at shutdown; they will be failed on next start");
    }

    retention_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), retention_handle).await;
    tracing::info!("Job retention task stopped");

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining progress streams");
    ws_manager.shutdown_all().await;

    heartbeat_handle.abort();
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
