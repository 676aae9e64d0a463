//! Fieldsync Gateway.
//!
//! A self-hosted sync server for field data collection projects. Clients
//! authenticate with a shared bearer secret, register projects subject to
//! an admission policy, and then replicate each project over a long-lived
//! WebSocket that is bridged to the store's replication stream.

pub mod admission;
pub mod auth;
pub mod bridge;
pub mod compare;
pub mod config;
pub mod error;
pub mod json;
pub mod routes;
pub mod session;

pub use admission::{Admission, AdmissionController, AdmissionOutcome, AdmissionPolicy};
pub use auth::{BearerAuthenticator, ServerSecret};
pub use bridge::{Bridge, BridgeConfig, BridgeHandle, BridgeReport, BridgeState, CloseReason};
pub use config::{Args, GatewayConfig};
pub use error::GatewayError;
pub use session::SessionRegistry;

use std::any::Any;
use std::sync::Arc;

use axum::{
    response::{IntoResponse, Response},
    Router,
};
use fieldsync_store::{DeviceIdentity, DeviceType, ProjectStore, StoreResult};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Project store.
    pub store: Arc<dyn ProjectStore>,
    /// Gateway configuration.
    pub config: Arc<GatewayConfig>,
    /// Bearer credential check.
    pub auth: BearerAuthenticator,
    /// Registration policy and serialization.
    pub admission: Arc<AdmissionController>,
    /// Live replication sessions.
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    /// Create new application state.
    pub fn new(store: Arc<dyn ProjectStore>, config: GatewayConfig) -> Self {
        Self {
            store,
            auth: BearerAuthenticator::new(config.server_secret.clone()),
            admission: Arc::new(AdmissionController::new(config.admission_policy.clone())),
            sessions: Arc::new(SessionRegistry::new()),
            config: Arc::new(config),
        }
    }
}

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);

    Router::new()
        .merge(routes::health::routes())
        .merge(routes::info::routes())
        .merge(routes::projects::routes(state.clone()))
        .merge(routes::sync::routes())
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "request handler panicked");
    GatewayError::Internal("request aborted".to_string()).into_response()
}

/// Announce this server under `name` as a self-hosted server.
///
/// Leaves any previously announced base URL in place.
pub async fn init_identity(store: &dyn ProjectStore, name: &str) -> StoreResult<DeviceIdentity> {
    let mut identity = store.device_identity().await?;
    if identity.name != name || identity.device_type != DeviceType::SelfHostedServer {
        identity.name = name.to_string();
        identity.device_type = DeviceType::SelfHostedServer;
        store.set_device_identity(identity.clone()).await?;
        tracing::info!(device_id = %identity.device_id, name, "device identity updated");
    }
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_store::LocalStore;

    #[tokio::test]
    async fn test_init_identity_sets_name_once() {
        let store = LocalStore::temporary().unwrap();

        let first = init_identity(&store, "Community server").await.unwrap();
        assert_eq!(first.name, "Community server");
        assert_eq!(first.device_type, DeviceType::SelfHostedServer);

        let again = init_identity(&store, "Community server").await.unwrap();
        assert_eq!(again, first);

        let renamed = init_identity(&store, "Renamed").await.unwrap();
        assert_eq!(renamed.device_id, first.device_id);
        assert_eq!(renamed.name, "Renamed");
    }
}
