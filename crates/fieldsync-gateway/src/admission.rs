//! Project admission.
//!
//! Decides whether a registration request may create a project on this
//! server. Re-registering a known project always succeeds without touching
//! the store's records. New projects must pass the configured
//! [`AdmissionPolicy`].
//!
//! The membership test against already-registered projects runs in
//! constant time over the whole set, so a caller cannot learn by timing
//! whether some registered id shares a prefix with the one it tries.

use std::fmt;
use std::str::FromStr;

use fieldsync_store::{
    CreateOptions, CreateProject, DeviceId, DeviceType, EncryptionKeys, ParseKeyError,
    ProjectKey, ProjectStore, PublicId, SelfHostedServerDetails, StoreResult,
};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::compare::contains_strict;
use crate::error::GatewayError;

/// Which projects this server accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// Accept new projects until this many are registered.
    Capacity(usize),
    /// Accept only these public ids.
    Allowlist(Vec<PublicId>),
}

/// Invalid `--allowed-projects` value.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("maximum project count must be positive")]
    ZeroCapacity,

    #[error("allowed projects must be a positive integer or a comma-separated list of public ids")]
    Empty,

    #[error("invalid public id {value:?}: {source}")]
    InvalidId {
        value: String,
        #[source]
        source: ParseKeyError,
    },
}

impl FromStr for AdmissionPolicy {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PolicyError::Empty);
        }

        if let Ok(max) = s.parse::<usize>() {
            if max == 0 {
                return Err(PolicyError::ZeroCapacity);
            }
            return Ok(AdmissionPolicy::Capacity(max));
        }

        let mut ids = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let id = part.parse().map_err(|source| PolicyError::InvalidId {
                value: part.to_string(),
                source,
            })?;
            ids.push(id);
        }
        if ids.is_empty() {
            return Err(PolicyError::Empty);
        }
        Ok(AdmissionPolicy::Allowlist(ids))
    }
}

impl fmt::Display for AdmissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionPolicy::Capacity(max) => write!(f, "capacity({max})"),
            AdmissionPolicy::Allowlist(ids) => write!(f, "allowlist({} ids)", ids.len()),
        }
    }
}

/// A validated registration request.
///
/// Deserialization rejects malformed hex, wrong key lengths and empty
/// names, so admission only ever sees well-formed input.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawRegisterProject")]
pub struct RegisterProject {
    pub project_name: String,
    pub project_key: ProjectKey,
    pub encryption_keys: EncryptionKeys,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRegisterProject {
    project_name: String,
    project_key: ProjectKey,
    encryption_keys: EncryptionKeys,
}

impl TryFrom<RawRegisterProject> for RegisterProject {
    type Error = String;

    fn try_from(raw: RawRegisterProject) -> Result<Self, Self::Error> {
        let project_name = raw.project_name.trim().to_string();
        if project_name.is_empty() {
            return Err("projectName must not be empty".to_string());
        }
        Ok(Self {
            project_name,
            project_key: raw.project_key,
            encryption_keys: raw.encryption_keys,
        })
    }
}

/// Whether a registration created the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Created,
    AlreadyRegistered,
}

/// Result of a successful registration.
#[derive(Debug, Clone)]
pub struct AdmissionOutcome {
    /// This server's device id.
    pub device_id: DeviceId,
    pub public_id: PublicId,
    pub admission: Admission,
}

/// Serializes registrations and applies the admission policy.
pub struct AdmissionController {
    policy: AdmissionPolicy,
    // Held from the existence check through creation.
    lock: Mutex<()>,
}

impl AdmissionController {
    pub fn new(policy: AdmissionPolicy) -> Self {
        Self {
            policy,
            lock: Mutex::new(()),
        }
    }

    /// Register a project, or accept a retry of an earlier registration.
    ///
    /// `base_url` is the address clients used to reach this server. It is
    /// announced in the device identity when a new project is admitted and
    /// it differs from the one already stored.
    ///
    /// # Panics
    ///
    /// Panics if the store creates the project under a public id other than
    /// the one derived from its key.
    pub async fn register(
        &self,
        store: &dyn ProjectStore,
        request: RegisterProject,
        base_url: Option<&str>,
    ) -> Result<AdmissionOutcome, GatewayError> {
        let public_id = store.derive_public_id(&request.project_key);

        let admission = {
            let _guard = self.lock.lock().await;

            let existing = store.list_projects().await?;
            let registered = contains_strict(
                existing.iter().map(|p| p.public_id.as_bytes().as_slice()),
                public_id.as_bytes(),
            );

            if registered {
                tracing::info!(project = %public_id, "project already registered");
                Admission::AlreadyRegistered
            } else {
                if let Err(err) = self.check_policy(&public_id, existing.len()) {
                    tracing::info!(project = %public_id, reason = %err, "project rejected");
                    return Err(err);
                }

                if let Some(base_url) = base_url {
                    announce_base_url(store, base_url).await?;
                }

                let created = store
                    .create_project(
                        CreateProject {
                            project_key: request.project_key,
                            name: request.project_name,
                            encryption_keys: request.encryption_keys,
                        },
                        CreateOptions { wait_for_sync: true },
                    )
                    .await?;
                assert_eq!(
                    created, public_id,
                    "store created project under a different public id"
                );

                tracing::info!(project = %public_id, "project admitted");
                Admission::Created
            }
        };

        let project = store.get_project(&public_id).await?;
        store.start_sync(&project);

        let identity = store.device_identity().await?;
        Ok(AdmissionOutcome {
            device_id: identity.device_id,
            public_id,
            admission,
        })
    }

    fn check_policy(&self, public_id: &PublicId, registered: usize) -> Result<(), GatewayError> {
        match &self.policy {
            AdmissionPolicy::Allowlist(allowed) => {
                let listed = contains_strict(
                    allowed.iter().map(|id| id.as_bytes().as_slice()),
                    public_id.as_bytes(),
                );
                if listed {
                    Ok(())
                } else {
                    Err(GatewayError::ProjectNotInAllowlist)
                }
            }
            AdmissionPolicy::Capacity(max) => {
                if registered >= *max {
                    Err(GatewayError::TooManyProjects { max: *max })
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Announce this server as a self-hosted server reachable at `base_url`,
/// unless that is already what the stored identity says.
async fn announce_base_url(store: &dyn ProjectStore, base_url: &str) -> StoreResult<()> {
    let mut identity = store.device_identity().await?;
    if identity.device_type == DeviceType::SelfHostedServer && identity.base_url() == Some(base_url)
    {
        return Ok(());
    }

    identity.device_type = DeviceType::SelfHostedServer;
    identity.self_hosted_server_details = Some(SelfHostedServerDetails {
        base_url: base_url.to_string(),
    });
    store.set_device_identity(identity).await?;
    tracing::info!(base_url, "announced self-hosted server address");
    Ok(())
}
