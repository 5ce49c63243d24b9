// ABOUTME: Deployment status state machine.
// ABOUTME: Success path is strictly forward; failed/cancelled reachable from any live stage.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a deployment record (and, mirrored, of its unit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployStatus {
    Pending,
    Cloning,
    Installing,
    Building,
    Starting,
    Running,
    Failed,
    Cancelled,
    /// Set by an explicit stop of a running unit.
    Stopped,
}

impl DeployStatus {
    /// Position on the success path, `None` for failure outcomes.
    fn rank(self) -> Option<u8> {
        match self {
            DeployStatus::Pending => Some(0),
            DeployStatus::Cloning => Some(1),
            DeployStatus::Installing => Some(2),
            DeployStatus::Building => Some(3),
            DeployStatus::Starting => Some(4),
            DeployStatus::Running => Some(5),
            DeployStatus::Failed | DeployStatus::Cancelled | DeployStatus::Stopped => None,
        }
    }

    /// No further pipeline transitions once here.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeployStatus::Running
                | DeployStatus::Failed
                | DeployStatus::Cancelled
                | DeployStatus::Stopped
        )
    }

    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Pipeline stages only move forward and may be skipped. `Failed` and
    /// `Cancelled` are reachable from any in-progress stage. The only exit
    /// from a terminal state is `Running -> Stopped`, which is the explicit
    /// stop operation rather than a pipeline step.
    pub fn can_transition_to(self, next: DeployStatus) -> bool {
        if self.is_terminal() {
            return self == DeployStatus::Running && next == DeployStatus::Stopped;
        }
        match next {
            DeployStatus::Failed | DeployStatus::Cancelled => true,
            DeployStatus::Stopped => false,
            _ => match (self.rank(), next.rank()) {
                (Some(from), Some(to)) => to > from,
                _ => false,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeployStatus::Pending => "pending",
            DeployStatus::Cloning => "cloning",
            DeployStatus::Installing => "installing",
            DeployStatus::Building => "building",
            DeployStatus::Starting => "starting",
            DeployStatus::Running => "running",
            DeployStatus::Failed => "failed",
            DeployStatus::Cancelled => "cancelled",
            DeployStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for DeployStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
