//! Fieldsync Store - project registry, device identity and replication hub.
//!
//! This crate owns everything the gateway treats as "the store":
//! - Project records keyed by their derived public id
//! - The server's own device identity
//! - Per-project replication streams, relayed between live sessions and
//!   persisted to an append-only chunk log
//!
//! The gateway only ever talks to the [`ProjectStore`] trait; [`LocalStore`]
//! is the sled-backed implementation used by the binary and the tests.

pub mod config;
pub mod error;
pub mod hub;
pub mod local;
pub mod store;
pub mod types;

pub use config::StoreConfig;
pub use error::{ParseKeyError, StoreError, StoreResult};
pub use local::LocalStore;
pub use store::{CreateOptions, CreateProject, ProjectStore, ReplicationStream};
pub use types::{
    DeviceId, DeviceIdentity, DeviceType, EncryptionKey, EncryptionKeys, ProjectHandle,
    ProjectKey, ProjectRecord, ProjectSummary, PublicId, SelfHostedServerDetails, KEY_LEN,
};
