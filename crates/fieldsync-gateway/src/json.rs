//! JSON response types for the HTTP surface.

use serde::Serialize;

use fieldsync_store::{DeviceId, ProjectSummary, PublicId};

/// Generic success response wrapper.
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T: Serialize> {
    /// Success flag.
    pub success: bool,
    /// Response data.
    pub data: T,
}

impl<T: Serialize> SuccessResponse<T> {
    /// Create a new success response.
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status.
    pub status: String,
    /// Gateway version.
    pub version: String,
    /// Registered projects.
    pub projects: usize,
    /// Live replication sessions.
    pub active_sessions: usize,
}

/// This server's public identity.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoJson {
    pub device_id: DeviceId,
    pub name: String,
}

/// A registered project.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectJson {
    pub project_id: PublicId,
    pub name: String,
}

impl From<ProjectSummary> for ProjectJson {
    fn from(summary: ProjectSummary) -> Self {
        Self {
            project_id: summary.public_id,
            name: summary.name,
        }
    }
}

/// Result of a registration.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredJson {
    /// The server's device id, so the client knows what it linked to.
    pub device_id: DeviceId,
}
