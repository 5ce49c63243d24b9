// ABOUTME: Persistence seams for projects, deployment records, and in-app inboxes.
// ABOUTME: The pipeline writes through these traits; MemoryStore implements them.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::deploy::{CommitInfo, DeployStatus, Deployment, LogEntry, Project};
use crate::types::{DeploymentId, ProjectId, UserId};

pub use memory::{HostRecord, MemoryStore};

/// Errors from a persistence backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("deployment not found: {0}")]
    DeploymentNotFound(DeploymentId),

    /// A finished record was asked to change in a way only a live run may.
    #[error("deployment {0} is finished and cannot be modified")]
    Immutable(DeploymentId),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable state the pipeline reads and mutates.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn project(&self, id: &ProjectId) -> StoreResult<Project>;

    async fn projects(&self) -> Vec<Project>;

    /// Update the unit's cached status.
    async fn set_project_status(&self, id: &ProjectId, status: DeployStatus) -> StoreResult<()>;

    /// Stamp `last_deployed_at` after a successful run.
    async fn mark_deployed(&self, id: &ProjectId, at: DateTime<Utc>) -> StoreResult<()>;

    async fn create_deployment(&self, deployment: Deployment) -> StoreResult<()>;

    async fn deployment(&self, id: &DeploymentId) -> StoreResult<Deployment>;

    async fn set_deployment_status(
        &self,
        id: &DeploymentId,
        status: DeployStatus,
    ) -> StoreResult<()>;

    async fn set_commit(&self, id: &DeploymentId, commit: CommitInfo) -> StoreResult<()>;

    async fn append_log(&self, id: &DeploymentId, entry: LogEntry) -> StoreResult<()>;

    /// Record the terminal outcome and finish time.
    async fn finish_deployment(
        &self,
        id: &DeploymentId,
        status: DeployStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn latest_deployment(&self, project: &ProjectId) -> StoreResult<Option<Deployment>>;

    /// All deployments of a project, newest first.
    async fn deployments(&self, project: &ProjectId) -> StoreResult<Vec<Deployment>>;
}

/// A notification held for a user inside the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboxMessage {
    pub title: String,
    pub message: String,
    pub project: ProjectId,
    pub deployment: DeploymentId,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

/// Per-user in-app notification storage.
#[async_trait]
pub trait Inbox: Send + Sync {
    async fn users(&self) -> Vec<UserId>;

    async fn deliver(&self, user: &UserId, message: InboxMessage) -> StoreResult<()>;

    async fn messages(&self, user: &UserId) -> Vec<InboxMessage>;
}
