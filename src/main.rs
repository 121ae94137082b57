use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use watchkeeper::config::Config;
use watchkeeper::store::{self, Store};
use watchkeeper::watchers::kube::KubeWatchSource;
use watchkeeper::watchers::WatcherManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load config
    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "/config/resources.yaml".to_string());
    let config = Config::load(&config_path).expect("Failed to load configuration");

    tracing::info!(
        "Starting watchkeeper (storage={}, retention={}d, port={}, resources={}, discoverCRDs={})",
        config.storage_path.display(),
        config.retention_days,
        config.server_port,
        config.resources.len(),
        config.discover_crds
    );

    // Open the event store
    let store = Arc::new(
        Store::open(&config.storage_path, config.retention_days)
            .expect("Failed to open event store"),
    );

    // Background expiry sweep
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let gc_task = tokio::spawn(store::run_gc_loop(store.clone(), shutdown_rx));

    // Connect to the cluster and start watchers
    let source = Arc::new(
        KubeWatchSource::connect()
            .await
            .expect("Failed to connect to the cluster"),
    );
    let manager = Arc::new(WatcherManager::new(source, store.clone(), &config));
    manager.start().await.expect("Failed to start watchers");

    let app = watchkeeper::build_app(store.clone(), config.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain order: watchers first so no new writes race the flush.
    manager.stop();
    let _ = shutdown_tx.send(true);
    let _ = gc_task.await;
    store.close().expect("Failed to flush event store");

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
