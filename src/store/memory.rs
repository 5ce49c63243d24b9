// ABOUTME: In-memory store backing hosts, projects, deployments, and inboxes.
// ABOUTME: Process-lifetime state; one instance is owned by the application root.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};

use super::{DeploymentStore, Inbox, InboxMessage, StoreError, StoreResult};
use crate::deploy::{CommitInfo, DeployStatus, Deployment, LogEntry, Project};
use crate::ssh::{self, HostAuth, HostCredentials, HostDirectory, HostStatus, HostSummary};
use crate::types::{DeploymentId, HostId, ProjectId, UserId};

/// A remote host with its credentials and last observed status.
#[derive(Debug)]
pub struct HostRecord {
    pub id: HostId,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: HostAuth,
    pub trust_first_connection: bool,
    pub status: HostStatus,
    pub last_checked: Option<DateTime<Utc>>,
}

impl HostRecord {
    fn address(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }

    fn summary(&self) -> HostSummary {
        HostSummary {
            id: self.id.clone(),
            address: self.address(),
            status: self.status,
            last_checked: self.last_checked,
        }
    }

    fn credentials(&self) -> HostCredentials {
        HostCredentials {
            id: self.id.clone(),
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            auth: copy_auth(&self.auth),
            trust_first_connection: self.trust_first_connection,
        }
    }
}

fn copy_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_owned())
}

fn copy_auth(auth: &HostAuth) -> HostAuth {
    match auth {
        HostAuth::Password(password) => HostAuth::Password(copy_secret(password)),
        HostAuth::Key { path, passphrase } => HostAuth::Key {
            path: PathBuf::from(path),
            passphrase: passphrase.as_ref().map(copy_secret),
        },
        HostAuth::Agent => HostAuth::Agent,
    }
}

#[derive(Debug, Default)]
struct State {
    hosts: HashMap<HostId, HostRecord>,
    projects: HashMap<ProjectId, Project>,
    deployments: HashMap<DeploymentId, Deployment>,
    users: Vec<UserId>,
    inboxes: HashMap<UserId, Vec<InboxMessage>>,
}

/// Store keeping everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_host(&self, host: HostRecord) {
        self.state.write().hosts.insert(host.id.clone(), host);
    }

    pub fn add_project(&self, project: Project) {
        self.state.write().projects.insert(project.id.clone(), project);
    }

    pub fn add_user(&self, user: UserId) {
        let mut state = self.state.write();
        if !state.users.contains(&user) {
            state.users.push(user);
        }
    }

    fn with_deployment<T>(
        &self,
        id: &DeploymentId,
        f: impl FnOnce(&mut Deployment) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut state = self.state.write();
        let deployment = state
            .deployments
            .get_mut(id)
            .ok_or_else(|| StoreError::DeploymentNotFound(id.clone()))?;
        f(deployment)
    }

    fn with_project<T>(
        &self,
        id: &ProjectId,
        f: impl FnOnce(&mut Project) -> T,
    ) -> StoreResult<T> {
        let mut state = self.state.write();
        let project = state
            .projects
            .get_mut(id)
            .ok_or_else(|| StoreError::ProjectNotFound(id.clone()))?;
        Ok(f(project))
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn project(&self, id: &ProjectId) -> StoreResult<Project> {
        self.state
            .read()
            .projects
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ProjectNotFound(id.clone()))
    }

    async fn projects(&self) -> Vec<Project> {
        let mut projects: Vec<_> = self.state.read().projects.values().cloned().collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        projects
    }

    async fn set_project_status(&self, id: &ProjectId, status: DeployStatus) -> StoreResult<()> {
        self.with_project(id, |project| project.status = Some(status))
    }

    async fn mark_deployed(&self, id: &ProjectId, at: DateTime<Utc>) -> StoreResult<()> {
        self.with_project(id, |project| project.last_deployed_at = Some(at))
    }

    async fn create_deployment(&self, deployment: Deployment) -> StoreResult<()> {
        let mut state = self.state.write();
        if !state.projects.contains_key(&deployment.project) {
            return Err(StoreError::ProjectNotFound(deployment.project.clone()));
        }
        state.deployments.insert(deployment.id.clone(), deployment);
        Ok(())
    }

    async fn deployment(&self, id: &DeploymentId) -> StoreResult<Deployment> {
        self.state
            .read()
            .deployments
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::DeploymentNotFound(id.clone()))
    }

    async fn set_deployment_status(
        &self,
        id: &DeploymentId,
        status: DeployStatus,
    ) -> StoreResult<()> {
        self.with_deployment(id, |deployment| {
            // Stopping a running unit is the one change allowed after finish.
            let stopping = deployment.status == DeployStatus::Running
                && status == DeployStatus::Stopped;
            if deployment.is_finished() && !stopping {
                return Err(StoreError::Immutable(id.clone()));
            }
            deployment.status = status;
            Ok(())
        })
    }

    async fn set_commit(&self, id: &DeploymentId, commit: CommitInfo) -> StoreResult<()> {
        self.with_deployment(id, |deployment| {
            if deployment.is_finished() {
                return Err(StoreError::Immutable(id.clone()));
            }
            deployment.commit = Some(commit);
            Ok(())
        })
    }

    async fn append_log(&self, id: &DeploymentId, entry: LogEntry) -> StoreResult<()> {
        self.with_deployment(id, |deployment| {
            if deployment.is_finished() {
                return Err(StoreError::Immutable(id.clone()));
            }
            deployment.logs.push(entry);
            Ok(())
        })
    }

    async fn finish_deployment(
        &self,
        id: &DeploymentId,
        status: DeployStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.with_deployment(id, |deployment| {
            if deployment.is_finished() {
                return Err(StoreError::Immutable(id.clone()));
            }
            deployment.status = status;
            deployment.error = error;
            deployment.finished_at = Some(at);
            Ok(())
        })
    }

    async fn latest_deployment(&self, project: &ProjectId) -> StoreResult<Option<Deployment>> {
        Ok(self.deployments(project).await?.into_iter().next())
    }

    async fn deployments(&self, project: &ProjectId) -> StoreResult<Vec<Deployment>> {
        let state = self.state.read();
        if !state.projects.contains_key(project) {
            return Err(StoreError::ProjectNotFound(project.clone()));
        }
        let mut deployments: Vec<_> = state
            .deployments
            .values()
            .filter(|d| &d.project == project)
            .cloned()
            .collect();
        deployments.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(deployments)
    }
}

#[async_trait]
impl HostDirectory for MemoryStore {
    async fn credentials(&self, id: &HostId) -> ssh::Result<HostCredentials> {
        self.state
            .read()
            .hosts
            .get(id)
            .map(HostRecord::credentials)
            .ok_or_else(|| ssh::Error::UnknownHost(id.to_string()))
    }

    async fn hosts(&self) -> Vec<HostSummary> {
        let mut hosts: Vec<_> = self
            .state
            .read()
            .hosts
            .values()
            .map(HostRecord::summary)
            .collect();
        hosts.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        hosts
    }

    async fn record_status(&self, id: &HostId, status: HostStatus, checked_at: DateTime<Utc>) {
        if let Some(host) = self.state.write().hosts.get_mut(id) {
            host.status = status;
            host.last_checked = Some(checked_at);
        }
    }
}

#[async_trait]
impl Inbox for MemoryStore {
    async fn users(&self) -> Vec<UserId> {
        self.state.read().users.clone()
    }

    async fn deliver(&self, user: &UserId, message: InboxMessage) -> StoreResult<()> {
        self.state
            .write()
            .inboxes
            .entry(user.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn messages(&self, user: &UserId) -> Vec<InboxMessage> {
        self.state
            .read()
            .inboxes
            .get(user)
            .cloned()
            .unwrap_or_default()
    }
}
