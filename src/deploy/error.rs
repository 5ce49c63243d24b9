// ABOUTME: Error types for deployment pipeline operations.
// ABOUTME: Stage failures, cancellation, mutual exclusion, and collaborator errors.

use crate::ssh;
use crate::store::StoreError;
use crate::types::ProjectId;

use super::status::DeployStatus;

/// Message recorded for runs stopped by a cancel request.
pub const CANCELLED_MESSAGE: &str = "Cancelled by user";

/// Errors that can occur while driving a deployment.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Cancellation was requested for the unit.
    #[error("Cancelled by user")]
    Cancelled,

    /// A user-configured command exited non-zero.
    #[error("Command failed with exit code {exit_code}: {command}")]
    CommandFailed { command: String, exit_code: u32 },

    /// The supervised process could not be verified after start.
    #[error("Failed to start {0} under pm2")]
    StartFailed(String),

    /// The detached process exited during the start probe window.
    #[error("Process died immediately after start; check {0}")]
    ProcessDied(String),

    /// The previous run of the unit did not release its slot in time.
    #[error("A deployment for {0} is still running and could not be cancelled in time; try again later")]
    CancelTimeout(ProjectId),

    /// Another request claimed the unit's slot first.
    #[error("Another deployment for {0} started first")]
    AlreadyActive(ProjectId),

    #[error("invalid commit hash: {0}")]
    InvalidCommit(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: DeployStatus, to: DeployStatus },

    #[error(transparent)]
    Ssh(#[from] ssh::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DeployError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DeployError::Cancelled)
    }

    /// Terminal status a run ending with this error is recorded as.
    pub fn terminal_status(&self) -> DeployStatus {
        if self.is_cancelled() {
            DeployStatus::Cancelled
        } else {
            DeployStatus::Failed
        }
    }
}
