//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use checkpoint_store::{CheckpointStore, InMemoryCheckpointStore, PostgresCheckpointStore};
use saga::InMemoryOrderActivities;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    let json = config.log_format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Open the checkpoint store
    let store: Arc<dyn CheckpointStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("using PostgreSQL checkpoint store");
            Arc::new(
                PostgresCheckpointStore::connect(url)
                    .await
                    .expect("failed to connect to checkpoint database"),
            )
        }
        None => {
            tracing::warn!("DATABASE_URL not set, checkpoints are kept in memory only");
            Arc::new(InMemoryCheckpointStore::new())
        }
    };

    // 4. Create application state and resume unfinished sagas
    let state = api::create_default_state(
        store,
        InMemoryOrderActivities::simulated(),
        config.saga_config(),
    );
    let resumed = state
        .orchestrator
        .recover()
        .await
        .expect("saga recovery failed");
    tracing::info!(count = resumed.len(), "resumed unfinished sagas");

    // 5. Build the application
    let app = api::create_app(state.clone(), metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Waiting sagas stop here and resume on the next start.
    state.orchestrator.shutdown();

    tracing::info!("server shut down gracefully");
}
