//! Fieldsync Gateway binary.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fieldsync_gateway::{create_router, init_identity, AppState, Args, GatewayConfig, SessionRegistry};
use fieldsync_store::{LocalStore, StoreConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line args
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "fieldsync_gateway={0},fieldsync_store={0},tower_http=info",
                    args.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::from(&args);

    info!(
        listen = %config.listen_addr,
        data_dir = %config.data_dir.display(),
        policy = %config.admission_policy,
        require_sync_auth = config.require_sync_auth,
        "Starting Fieldsync Gateway"
    );

    // Open the project store
    let store_config =
        StoreConfig::new(&config.data_dir).with_stream_buffer_size(config.sync_buffer_size);
    let store = Arc::new(LocalStore::open(store_config)?);
    if store.was_recovered() {
        info!(projects = store.project_count(), "Recovered existing store");
    }

    let identity = init_identity(store.as_ref(), &config.server_name).await?;
    info!(device_id = %identity.device_id, name = %identity.name, "Device identity ready");

    // Create application state
    let state = AppState::new(store.clone(), config.clone());
    let sessions = state.sessions.clone();

    // Create router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("Gateway listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(sessions, config.shutdown_timeout))
        .await?;

    store.flush().await?;
    info!("Gateway stopped");

    Ok(())
}

/// Resolve on ctrl-c after closing every live replication session.
async fn shutdown_signal(sessions: Arc<SessionRegistry>, timeout: Duration) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }

    info!(sessions = sessions.count(), "Shutting down");
    for session in sessions.list() {
        info!(
            session = session.id,
            project = %session.project,
            state = ?session.state,
            age_secs = session.age.as_secs(),
            bytes_in = session.bytes_in,
            bytes_out = session.bytes_out,
            "closing sync session"
        );
    }
    let remaining = sessions.close_all(timeout).await;
    if remaining > 0 {
        tracing::warn!(remaining, "sessions still open at shutdown");
    }
}
