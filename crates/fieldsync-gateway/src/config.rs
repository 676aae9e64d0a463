//! Gateway configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::admission::AdmissionPolicy;
use crate::auth::ServerSecret;
use crate::bridge::{BridgeConfig, DEFAULT_CHUNK_SIZE};

/// Default size of each session's in-memory replication pipe.
pub const DEFAULT_SYNC_BUFFER_SIZE: usize = 256 * 1024;

/// Fieldsync gateway command line arguments.
#[derive(Debug, Parser)]
#[command(name = "fieldsync-gateway")]
#[command(about = "Self-hosted sync gateway for field data collection projects")]
pub struct Args {
    /// Address to listen on for HTTP requests.
    #[arg(short, long, env = "FIELDSYNC_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Directory holding the project store.
    #[arg(long, env = "FIELDSYNC_DATA_DIR", default_value = "./fieldsync-data")]
    pub data_dir: PathBuf,

    /// Shared secret clients present as `Authorization: Bearer <token>`.
    #[arg(
        long,
        env = "FIELDSYNC_SERVER_BEARER_TOKEN",
        hide_env_values = true,
        value_parser = parse_secret
    )]
    pub server_bearer_token: ServerSecret,

    /// Name this server announces to clients.
    #[arg(long, env = "FIELDSYNC_SERVER_NAME")]
    pub server_name: String,

    /// Either the maximum number of projects, or a comma-separated list of
    /// project public ids that may be registered.
    #[arg(long, env = "FIELDSYNC_ALLOWED_PROJECTS", default_value = "1")]
    pub allowed_projects: AdmissionPolicy,

    /// Scheme used when deriving this server's base URL from request headers.
    #[arg(
        long,
        env = "FIELDSYNC_PUBLIC_SCHEME",
        default_value = "http",
        value_parser = ["http", "https"]
    )]
    pub public_scheme: String,

    /// Require the bearer credential on sync connections as well.
    #[arg(long, env = "FIELDSYNC_REQUIRE_SYNC_AUTH")]
    pub require_sync_auth: bool,

    /// Maximum bytes per outbound sync message.
    #[arg(long, env = "FIELDSYNC_SYNC_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub sync_chunk_size: usize,

    /// Size of each session's replication pipe buffer.
    #[arg(long, env = "FIELDSYNC_SYNC_BUFFER_SIZE", default_value_t = DEFAULT_SYNC_BUFFER_SIZE)]
    pub sync_buffer_size: usize,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, env = "FIELDSYNC_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

fn parse_secret(value: &str) -> Result<ServerSecret, String> {
    ServerSecret::new(value).ok_or_else(|| "bearer token must not be empty".to_string())
}

/// Gateway configuration. Immutable once the server starts.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to listen on for HTTP requests.
    pub listen_addr: String,
    /// Directory holding the project store.
    pub data_dir: PathBuf,
    /// Bearer secret.
    pub server_secret: ServerSecret,
    /// Name announced in the device identity.
    pub server_name: String,
    /// Which projects may be registered.
    pub admission_policy: AdmissionPolicy,
    /// Scheme of the announced base URL.
    pub public_scheme: String,
    /// Whether sync connections need the bearer credential.
    pub require_sync_auth: bool,
    /// Per-session bridge tuning.
    pub bridge: BridgeConfig,
    /// Per-session replication pipe size.
    pub sync_buffer_size: usize,
    /// How long shutdown waits for sessions to close.
    pub shutdown_timeout: Duration,
}

impl GatewayConfig {
    /// Configuration with defaults for everything but the secret and name.
    pub fn new(server_secret: ServerSecret, server_name: impl Into<String>) -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            data_dir: PathBuf::from("./fieldsync-data"),
            server_secret,
            server_name: server_name.into(),
            admission_policy: AdmissionPolicy::Capacity(1),
            public_scheme: "http".to_string(),
            require_sync_auth: false,
            bridge: BridgeConfig::default(),
            sync_buffer_size: DEFAULT_SYNC_BUFFER_SIZE,
            shutdown_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_admission_policy(mut self, policy: AdmissionPolicy) -> Self {
        self.admission_policy = policy;
        self
    }

    pub fn with_require_sync_auth(mut self, require: bool) -> Self {
        self.require_sync_auth = require;
        self
    }
}

impl From<&Args> for GatewayConfig {
    fn from(args: &Args) -> Self {
        Self {
            listen_addr: args.listen.clone(),
            data_dir: args.data_dir.clone(),
            server_secret: args.server_bearer_token.clone(),
            server_name: args.server_name.clone(),
            admission_policy: args.allowed_projects.clone(),
            public_scheme: args.public_scheme.clone(),
            require_sync_auth: args.require_sync_auth,
            bridge: BridgeConfig::default().with_chunk_size(args.sync_chunk_size),
            sync_buffer_size: args.sync_buffer_size.max(1),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}
