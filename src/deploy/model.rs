// ABOUTME: Deployable unit and deployment record types.
// ABOUTME: What the pipeline reads from and writes to the store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::DeployStatus;
use crate::types::{DeploymentId, HostId, ProjectId, UnitName, UserId};

/// How the unit's runtime process is kept alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessManager {
    /// Background shell job tracked by a PID file.
    #[default]
    Nohup,
    /// Entry in the pm2 process supervisor.
    Pm2,
}

/// Mirror of the build output into a serving directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSync {
    /// Destination directory on the host.
    pub path: String,
    /// Sub-directory of the working directory to copy; the whole directory if unset.
    #[serde(default)]
    pub source: Option<String>,
}

/// A configured deployable application.
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: UnitName,
    pub host: HostId,
    pub repository: String,
    pub branch: String,
    pub deploy_path: String,
    pub subfolder: Option<String>,
    pub install_command: Option<String>,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
    pub stop_command: Option<String>,
    pub pre_deploy_command: Option<String>,
    pub post_deploy_command: Option<String>,
    pub env: BTreeMap<String, String>,
    pub output: Option<OutputSync>,
    pub process_manager: ProcessManager,
    /// Mirrors the status of the most recent deployment; `None` before the first.
    pub status: Option<DeployStatus>,
    pub scheduled_deploy_at: Option<DateTime<Utc>>,
    pub last_deployed_at: Option<DateTime<Utc>>,
}

impl Project {
    /// Directory commands run in: the deploy path, or the subfolder inside it.
    pub fn working_dir(&self) -> String {
        match self.subfolder.as_deref().map(|s| s.trim_matches('/')) {
            Some(sub) if !sub.is_empty() => {
                format!("{}/{}", self.deploy_path.trim_end_matches('/'), sub)
            }
            _ => self.deploy_path.clone(),
        }
    }

    pub fn install(&self) -> Option<&str> {
        configured(&self.install_command)
    }

    pub fn build(&self) -> Option<&str> {
        configured(&self.build_command)
    }

    pub fn start(&self) -> Option<&str> {
        configured(&self.start_command)
    }

    pub fn stop(&self) -> Option<&str> {
        configured(&self.stop_command)
    }

    pub fn pre_deploy(&self) -> Option<&str> {
        configured(&self.pre_deploy_command)
    }

    pub fn post_deploy(&self) -> Option<&str> {
        configured(&self.post_deploy_command)
    }
}

/// Blank command strings count as not configured.
fn configured(command: &Option<String>) -> Option<&str> {
    command.as_deref().map(str::trim).filter(|c| !c.is_empty())
}

/// What started a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Manual,
    Webhook,
    Schedule,
}

/// Severity of a deployment log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub text: String,
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(text: impl Into<String>, level: LogLevel) -> Self {
        Self {
            text: text.into(),
            level,
            timestamp: Utc::now(),
        }
    }
}

/// Commit the working tree ended up on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub message: String,
    pub author: String,
}

/// One pipeline execution attempt.
#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub project: ProjectId,
    pub host: HostId,
    pub trigger: Trigger,
    pub triggered_by: Option<UserId>,
    /// Commit requested by a rollback.
    pub target_commit: Option<String>,
    pub commit: Option<CommitInfo>,
    pub status: DeployStatus,
    pub logs: Vec<LogEntry>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Deployment {
    pub fn new(project: &Project, trigger: Trigger, triggered_by: Option<UserId>) -> Self {
        Self {
            id: DeploymentId::generate(),
            project: project.id.clone(),
            host: project.host.clone(),
            trigger,
            triggered_by,
            target_commit: None,
            commit: None,
            status: DeployStatus::Pending,
            logs: Vec::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}
