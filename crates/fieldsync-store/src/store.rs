//! The boundary between the gateway and the project store.

use async_trait::async_trait;
use tokio::io::DuplexStream;

use crate::error::StoreResult;
use crate::types::{
    DeviceIdentity, EncryptionKeys, ProjectHandle, ProjectKey, ProjectSummary, PublicId,
};

/// One end of a project's replication pipe.
///
/// Bytes written are delivered to the project's replication engine; bytes
/// read come from it. Once the writer is shut down the engine ends the
/// stream, so a reader always observes end-of-file after its own input ends.
pub type ReplicationStream = DuplexStream;

/// Parameters for registering a project.
#[derive(Debug, Clone)]
pub struct CreateProject {
    pub project_key: ProjectKey,
    pub name: String,
    pub encryption_keys: EncryptionKeys,
}

/// Options for [`ProjectStore::create_project`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    /// Wait until the new record is durable before returning.
    pub wait_for_sync: bool,
}

/// Operations the gateway consumes from the project store.
///
/// Implementations are shared across every request and session, so all
/// methods take `&self`.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Derive the public id of a project key. Deterministic and one-way.
    fn derive_public_id(&self, project_key: &ProjectKey) -> PublicId;

    /// List every registered project.
    async fn list_projects(&self) -> StoreResult<Vec<ProjectSummary>>;

    /// Register a project and return its public id.
    ///
    /// The returned id must equal `derive_public_id(&params.project_key)`.
    async fn create_project(
        &self,
        params: CreateProject,
        options: CreateOptions,
    ) -> StoreResult<PublicId>;

    /// Look up a project, failing with `StoreError::NotFound` when absent.
    async fn get_project(&self, public_id: &PublicId) -> StoreResult<ProjectHandle>;

    /// Read this server's device identity.
    async fn device_identity(&self) -> StoreResult<DeviceIdentity>;

    /// Replace this server's device identity.
    async fn set_device_identity(&self, identity: DeviceIdentity) -> StoreResult<()>;

    /// Open a new replication stream scoped to one project.
    async fn open_replication_stream(
        &self,
        project: &ProjectHandle,
    ) -> StoreResult<ReplicationStream>;

    /// Mark ongoing sync as started for a project. Never blocks the caller
    /// on a sync round-trip and never fails it.
    fn start_sync(&self, project: &ProjectHandle);
}
