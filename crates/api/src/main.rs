//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::worker;
use saga_store::{InMemorySagaStore, PostgresSagaStore, SagaStore};
use tokio::signal;
use tokio::sync::watch;
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

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn open_store(config: &Config) -> (Arc<dyn SagaStore>, &'static str) {
    match &config.database_url {
        Some(url) => {
            let store = PostgresSagaStore::connect(url)
                .await
                .expect("failed to connect to PostgreSQL");
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            (Arc::new(store), "postgres")
        }
        None => {
            tracing::warn!("DATABASE_URL not set, saga state is kept in memory");
            (Arc::new(InMemorySagaStore::new()), "memory")
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Open the saga store and wire the orchestrator
    let (store, backend) = open_store(&config).await;
    let (state, participants) = api::create_default_state(store, backend, config.retry_policy());
    let consumer =
        worker::spawn_response_consumer(state.orchestrator.clone(), participants.responses);

    // 4. Resume whatever a previous process left behind
    if let Err(e) = state.orchestrator.recover().await {
        tracing::error!(error = %e, "recovery sweep failed");
    }

    // 5. Background sweeper
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = worker::spawn_sweeper(
        state.orchestrator.clone(),
        config.sweep_interval,
        config.retention,
        shutdown_rx,
    );

    // 6. Start server
    let app = api::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, store = backend, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 7. Stop background work
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "sweeper task ended abnormally");
    }
    consumer.abort();

    tracing::info!("server shut down gracefully");
}
