// ABOUTME: Start strategy selection for a deployable unit.
// ABOUTME: Detached background job with PID/log files, or a pm2-supervised entry.

use super::model::{ProcessManager, Project};
use super::script;

/// How the unit's process is started and later stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartStrategy {
    /// `nohup` background job; PID and output go to files in the state directory.
    Detached { pid_file: String, log_file: String },

    /// pm2 entry named after the unit.
    Supervised { name: String },
}

impl StartStrategy {
    /// Select the strategy once per unit.
    pub fn for_project(project: &Project) -> Self {
        match project.process_manager {
            ProcessManager::Nohup => StartStrategy::Detached {
                pid_file: script::app_pid_file(&project.name),
                log_file: script::app_log_file(&project.name),
            },
            ProcessManager::Pm2 => StartStrategy::Supervised {
                name: project.name.to_string(),
            },
        }
    }

    /// Command that stops whatever this strategy started. Safe to run when
    /// nothing is running.
    pub fn stop_command(&self) -> String {
        match self {
            StartStrategy::Detached { pid_file, .. } => script::kill_pid_file(pid_file),
            StartStrategy::Supervised { name } => script::pm2_stop(name),
        }
    }

    /// Command printing the most recent output of the unit's process.
    pub fn logs_command(&self, lines: usize) -> String {
        match self {
            StartStrategy::Detached { log_file, .. } => script::read_log(log_file, lines),
            StartStrategy::Supervised { name } => script::pm2_logs(name, lines),
        }
    }
}
