//! sled-backed project store.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use sled::{Db, Tree};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::hub::ReplicationHub;
use crate::store::{CreateOptions, CreateProject, ProjectStore, ReplicationStream};
use crate::types::{DeviceIdentity, ProjectHandle, ProjectKey, ProjectRecord, ProjectSummary, PublicId};

/// Tree name for project records.
const PROJECTS_TREE: &str = "projects";

/// Tree name for server metadata.
const META_TREE: &str = "meta";

/// Key of the device identity in the meta tree.
const DEVICE_IDENTITY_KEY: &[u8] = b"device_identity";

/// Prefix of each project's replication log tree.
const REPLICATION_TREE_PREFIX: &str = "replication:";

/// Key-derivation context for public ids.
const PUBLIC_ID_CONTEXT: &str = "fieldsync project public id v1";

/// Project store persisting to sled.
pub struct LocalStore {
    db: Db,
    projects: Tree,
    meta: Tree,
    hubs: DashMap<PublicId, Arc<ReplicationHub>>,
    config: StoreConfig,
}

impl LocalStore {
    /// Open or create a store.
    ///
    /// A device identity with a random device id is generated and persisted
    /// the first time a database is opened.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        let db = config.to_sled_config().open()?;
        let projects = db.open_tree(PROJECTS_TREE)?;
        let meta = db.open_tree(META_TREE)?;

        let store = Self {
            db,
            projects,
            meta,
            hubs: DashMap::new(),
            config,
        };

        if store.meta.get(DEVICE_IDENTITY_KEY)?.is_none() {
            let identity = DeviceIdentity::generate();
            store.write_identity(&identity)?;
            tracing::info!(device_id = %identity.device_id, "generated device identity");
        }

        Ok(store)
    }

    /// Open a throwaway store.
    pub fn temporary() -> StoreResult<Self> {
        Self::open(StoreConfig::temporary())
    }

    /// Number of registered projects.
    pub fn project_count(&self) -> usize {
        self.projects.len()
    }

    /// Whether the database was recovered after an unclean shutdown.
    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    /// Flush all pending writes to disk.
    pub async fn flush(&self) -> StoreResult<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Read a full project record, including its keys.
    pub fn project_record(&self, public_id: &PublicId) -> StoreResult<Option<ProjectRecord>> {
        match self.projects.get(public_id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_identity(&self, identity: &DeviceIdentity) -> StoreResult<()> {
        let bytes = serde_json::to_vec(identity)?;
        self.meta.insert(DEVICE_IDENTITY_KEY, bytes)?;
        Ok(())
    }

    fn hub(&self, public_id: &PublicId) -> StoreResult<Arc<ReplicationHub>> {
        if let Some(hub) = self.hubs.get(public_id) {
            return Ok(hub.clone());
        }

        let tree_name = format!("{}{}", REPLICATION_TREE_PREFIX, public_id.to_hex());
        let tree = self.db.open_tree(tree_name)?;
        let hub = self
            .hubs
            .entry(*public_id)
            .or_try_insert_with(|| {
                ReplicationHub::open(
                    *public_id,
                    tree,
                    self.config.stream_buffer_size,
                    self.config.fanout_capacity,
                )
                .map(Arc::new)
            })?
            .clone();
        Ok(hub)
    }

    fn mark_sync_enabled(&self, public_id: &PublicId) -> StoreResult<()> {
        let Some(mut record) = self.project_record(public_id)? else {
            return Err(StoreError::NotFound(public_id.to_hex()));
        };
        if !record.sync_enabled {
            record.sync_enabled = true;
            self.projects.insert(public_id, serde_json::to_vec(&record)?)?;
        }
        Ok(())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[async_trait]
impl ProjectStore for LocalStore {
    fn derive_public_id(&self, project_key: &ProjectKey) -> PublicId {
        PublicId::from_bytes(blake3::derive_key(PUBLIC_ID_CONTEXT, project_key.as_bytes()))
    }

    async fn list_projects(&self) -> StoreResult<Vec<ProjectSummary>> {
        let mut projects = Vec::with_capacity(self.projects.len());
        for entry in self.projects.iter() {
            let (_, value) = entry?;
            let record: ProjectRecord = serde_json::from_slice(&value)?;
            projects.push(ProjectSummary {
                public_id: record.public_id,
                name: record.name,
            });
        }
        Ok(projects)
    }

    async fn create_project(
        &self,
        params: CreateProject,
        options: CreateOptions,
    ) -> StoreResult<PublicId> {
        let public_id = self.derive_public_id(&params.project_key);
        let record = ProjectRecord {
            public_id,
            name: params.name,
            project_key: params.project_key,
            encryption_keys: params.encryption_keys,
            created_at: now_millis(),
            sync_enabled: false,
        };
        let bytes = serde_json::to_vec(&record)?;

        // First-seen keys win; a second create for the same id is a no-op.
        match self
            .projects
            .compare_and_swap(public_id, None::<&[u8]>, Some(bytes))?
        {
            Ok(()) => tracing::info!(project = %public_id, "project created"),
            Err(_) => tracing::debug!(project = %public_id, "project already exists"),
        }

        if options.wait_for_sync {
            self.projects.flush_async().await?;
        }

        Ok(public_id)
    }

    async fn get_project(&self, public_id: &PublicId) -> StoreResult<ProjectHandle> {
        self.project_record(public_id)?
            .map(|record| ProjectHandle::from(&record))
            .ok_or_else(|| StoreError::NotFound(public_id.to_hex()))
    }

    async fn device_identity(&self) -> StoreResult<DeviceIdentity> {
        let bytes = self
            .meta
            .get(DEVICE_IDENTITY_KEY)?
            .ok_or_else(|| StoreError::InvalidData("device identity missing".to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn set_device_identity(&self, identity: DeviceIdentity) -> StoreResult<()> {
        self.write_identity(&identity)?;
        self.meta.flush_async().await?;
        Ok(())
    }

    async fn open_replication_stream(
        &self,
        project: &ProjectHandle,
    ) -> StoreResult<ReplicationStream> {
        let hub = self.hub(&project.public_id)?;
        Ok(hub.open_session())
    }

    fn start_sync(&self, project: &ProjectHandle) {
        if let Err(e) = self.mark_sync_enabled(&project.public_id) {
            tracing::warn!(project = %project.public_id, error = %e, "failed to start sync");
        }
    }
}
