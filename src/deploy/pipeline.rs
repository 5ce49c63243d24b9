// ABOUTME: Stage-by-stage execution of one deployment run.
// ABOUTME: Every remote step checks the cancel token and streams its output as log lines.

use crate::broadcast::Broadcaster;
use crate::ssh::{CommandOutput, LineEvent, SessionManager, StreamKind};
use crate::store::DeploymentStore;

use super::engine::EngineSettings;
use super::error::DeployError;
use super::model::{LogLevel, Project};
use super::registry::CancelToken;
use super::script::{self, RepoState};
use super::status::DeployStatus;
use super::strategy::StartStrategy;
use crate::types::DeploymentId;

type Result<T> = std::result::Result<T, DeployError>;

/// One run of the pipeline for one unit.
///
/// Stages never write a terminal status; the engine records the outcome
/// from the value [`execute`](Self::execute) returns.
pub(crate) struct Pipeline<'a> {
    sessions: &'a SessionManager,
    store: &'a dyn DeploymentStore,
    broadcaster: &'a Broadcaster,
    settings: &'a EngineSettings,
    project: &'a Project,
    deployment: &'a DeploymentId,
    token: CancelToken,
    target_commit: Option<&'a str>,
    status: DeployStatus,
}

impl<'a> Pipeline<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        sessions: &'a SessionManager,
        store: &'a dyn DeploymentStore,
        broadcaster: &'a Broadcaster,
        settings: &'a EngineSettings,
        project: &'a Project,
        deployment: &'a DeploymentId,
        token: CancelToken,
        target_commit: Option<&'a str>,
    ) -> Self {
        Self {
            sessions,
            store,
            broadcaster,
            settings,
            project,
            deployment,
            token,
            target_commit,
            status: DeployStatus::Pending,
        }
    }

    pub(crate) async fn execute(&mut self) -> Result<()> {
        self.prepare_repository().await?;
        self.record_commit().await?;
        self.write_env().await?;
        self.pre_deploy().await?;
        self.install().await?;
        self.build().await?;
        self.sync_output().await?;
        self.start().await?;
        self.post_deploy().await?;
        Ok(())
    }

    async fn log(&self, text: impl Into<String>, level: LogLevel) {
        self.broadcaster
            .log_line(self.deployment, &self.project.id, text, level)
            .await;
    }

    async fn set_status(&mut self, next: DeployStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DeployError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.store
            .set_deployment_status(self.deployment, next)
            .await?;
        if let Err(e) = self.store.set_project_status(&self.project.id, next).await {
            tracing::warn!("Failed to mirror status onto {}: {}", self.project.name, e);
        }
        self.status = next;
        self.broadcaster
            .status_changed(self.deployment, &self.project.id, next);
        tracing::info!(project = %self.project.name, deployment = %self.deployment, "{}", next);
        Ok(())
    }

    /// Run a command to completion on the pooled connection.
    async fn query(&self, command: &str) -> Result<CommandOutput> {
        self.token.check()?;
        Ok(self.sessions.run(&self.project.host, command).await?)
    }

    /// Like [`query`](Self::query) but a non-zero exit fails the run.
    async fn query_checked(&self, command: &str, display: &str) -> Result<CommandOutput> {
        let output = self.query(command).await?;
        if !output.success() {
            for line in output.stderr.lines().filter(|l| !l.trim().is_empty()) {
                self.log(line, LogLevel::Warning).await;
            }
            return Err(DeployError::CommandFailed {
                command: display.to_string(),
                exit_code: output.exit_code,
            });
        }
        Ok(output)
    }

    /// Run a stage command, streaming its output into the deployment log.
    ///
    /// The command's process group is recorded in the stage marker file so
    /// a cancel request can signal it.
    async fn run_stage(&self, command: &str, workdir: Option<&str>) -> Result<()> {
        self.token.check()?;
        let pid_file = script::stage_pid_file(&self.project.name);
        let wrapped = script::wrap_stage(workdir, command, &pid_file);
        let mut lines = self
            .sessions
            .execute_lines(&self.project.host, &wrapped)
            .await?;

        while let Some(event) = lines.next().await {
            match event {
                LineEvent::Line { stream, text } => {
                    let level = match stream {
                        StreamKind::Stdout => LogLevel::Info,
                        StreamKind::Stderr => LogLevel::Warning,
                    };
                    self.log(text, level).await;
                }
                LineEvent::Finished(Ok(0)) => return Ok(()),
                LineEvent::Finished(result) => {
                    self.token.check()?;
                    let exit_code = result?;
                    return Err(DeployError::CommandFailed {
                        command: command.to_string(),
                        exit_code,
                    });
                }
            }
        }
        self.token.check()?;
        Err(crate::ssh::Error::ChannelClosed.into())
    }

    async fn prepare_repository(&mut self) -> Result<()> {
        self.set_status(DeployStatus::Cloning).await?;
        let project = self.project;
        let path = project.deploy_path.as_str();

        let probe = self.query(&script::probe_repo(path)).await?;
        let state = script::parse_repo_state(&probe.stdout);

        match state {
            RepoState::Repository if self.target_commit.is_none() => {
                self.log(
                    format!("Pulling latest changes from {}", project.branch),
                    LogLevel::Info,
                )
                .await;
                self.run_stage(&script::pull(path, &project.branch), None)
                    .await?;
            }
            RepoState::Repository => {}
            RepoState::Partial | RepoState::Absent => {
                if state == RepoState::Partial {
                    self.log(
                        format!("Removing incomplete checkout at {}", path),
                        LogLevel::Warning,
                    )
                    .await;
                }
                self.log(
                    format!("Cloning {} ({})", project.repository, project.branch),
                    LogLevel::Info,
                )
                .await;
                self.run_stage(
                    &script::fresh_clone(&project.repository, &project.branch, path),
                    None,
                )
                .await?;
            }
        }

        if let Some(commit) = self.target_commit {
            self.log(format!("Checking out commit {}", commit), LogLevel::Info)
                .await;
            self.run_stage(&script::checkout_commit(path, commit), None)
                .await?;
        }

        self.log("Repository ready", LogLevel::Success).await;
        Ok(())
    }

    async fn record_commit(&self) -> Result<()> {
        let output = match self.query(&script::commit_info(&self.project.deploy_path)).await {
            Ok(output) => output,
            Err(DeployError::Cancelled) => return Err(DeployError::Cancelled),
            Err(e) => {
                tracing::warn!("Could not read commit for {}: {}", self.project.name, e);
                return Ok(());
            }
        };
        let Some(commit) = script::parse_commit_info(&output.stdout) else {
            return Ok(());
        };
        self.log(
            format!(
                "Commit {}: {} ({})",
                commit.hash, commit.message, commit.author
            ),
            LogLevel::Info,
        )
        .await;
        if let Err(e) = self.store.set_commit(self.deployment, commit).await {
            tracing::warn!("Failed to record commit for {}: {}", self.deployment, e);
        }
        Ok(())
    }

    /// Materialize `.env`. Failures are reported and otherwise ignored.
    async fn write_env(&self) -> Result<()> {
        if self.project.env.is_empty() {
            return Ok(());
        }
        let workdir = self.project.working_dir();
        self.log(
            format!("Writing .env ({} variables)", self.project.env.len()),
            LogLevel::Info,
        )
        .await;
        match self.query(&script::write_env(&workdir, &self.project.env)).await {
            Ok(output) if output.success() => {}
            Ok(output) => {
                self.log(
                    format!("Could not write .env (exit code {})", output.exit_code),
                    LogLevel::Warning,
                )
                .await;
            }
            Err(DeployError::Cancelled) => return Err(DeployError::Cancelled),
            Err(e) => {
                self.log(format!("Could not write .env: {}", e), LogLevel::Warning)
                    .await;
            }
        }
        Ok(())
    }

    async fn pre_deploy(&self) -> Result<()> {
        let Some(command) = self.project.pre_deploy() else {
            return Ok(());
        };
        self.log(format!("Running pre-deploy hook: {}", command), LogLevel::Info)
            .await;
        self.run_stage(command, Some(&self.project.working_dir()))
            .await?;
        self.log("Pre-deploy hook finished", LogLevel::Success)
            .await;
        Ok(())
    }

    async fn install(&mut self) -> Result<()> {
        let project = self.project;
        let Some(command) = project.install() else {
            return Ok(());
        };
        self.set_status(DeployStatus::Installing).await?;
        self.log(format!("Installing dependencies: {}", command), LogLevel::Info)
            .await;
        self.run_stage(command, Some(&self.project.working_dir()))
            .await?;
        self.log("Dependencies installed", LogLevel::Success).await;
        Ok(())
    }

    async fn build(&mut self) -> Result<()> {
        let project = self.project;
        let Some(command) = project.build() else {
            return Ok(());
        };
        self.set_status(DeployStatus::Building).await?;
        self.log(format!("Building: {}", command), LogLevel::Info)
            .await;
        self.run_stage(command, Some(&self.project.working_dir()))
            .await?;
        self.log("Build finished", LogLevel::Success).await;
        Ok(())
    }

    async fn sync_output(&self) -> Result<()> {
        let Some(output) = &self.project.output else {
            return Ok(());
        };
        let workdir = self.project.working_dir();
        let source = match output.source.as_deref().map(|s| s.trim_matches('/')) {
            Some(sub) if !sub.is_empty() => format!("{}/{}", workdir, sub),
            _ => workdir,
        };
        self.log(
            format!("Copying {} to {}", source, output.path),
            LogLevel::Info,
        )
        .await;
        self.run_stage(&script::sync_output(&source, &output.path), None)
            .await?;
        self.log("Output copied", LogLevel::Success).await;
        Ok(())
    }

    /// Stop whatever is running. Absence of a process is not an error.
    async fn stop_existing(&self, strategy: &StartStrategy) -> Result<()> {
        let workdir = self.project.working_dir();
        let mut commands = Vec::new();
        if let Some(stop) = self.project.stop() {
            commands.push(script::in_dir(&workdir, stop));
        }
        commands.push(strategy.stop_command());

        for command in commands {
            match self.query(&command).await {
                Ok(_) => {}
                Err(DeployError::Cancelled) => return Err(DeployError::Cancelled),
                Err(e) => tracing::debug!("Stop before start on {}: {}", self.project.name, e),
            }
        }
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        self.set_status(DeployStatus::Starting).await?;
        let project = self.project;
        let strategy = StartStrategy::for_project(project);
        self.stop_existing(&strategy).await?;

        let Some(command) = project.start() else {
            self.log("No start command configured, skipping start", LogLevel::Warning)
                .await;
            return Ok(());
        };

        match &strategy {
            StartStrategy::Detached { pid_file, log_file } => {
                self.start_detached(command, pid_file, log_file).await
            }
            StartStrategy::Supervised { name } => self.start_supervised(command, name).await,
        }
    }

    async fn start_detached(&self, command: &str, pid_file: &str, log_file: &str) -> Result<()> {
        let workdir = self.project.working_dir();
        self.log(format!("Starting in background: {}", command), LogLevel::Info)
            .await;
        self.query_checked(
            &script::start_detached(&workdir, command, pid_file, log_file),
            command,
        )
        .await?;

        let window = self.settings.start_probe_window.as_secs().max(1);
        self.follow_log(log_file, window).await?;

        let alive = self.query(&script::process_alive(pid_file)).await?;
        if !alive.success() {
            return Err(DeployError::ProcessDied(log_file.to_string()));
        }
        self.log(
            format!("{} is running", self.project.name),
            LogLevel::Success,
        )
        .await;
        Ok(())
    }

    /// Forward the unit's log output for the probe window.
    async fn follow_log(&self, log_file: &str, seconds: u64) -> Result<()> {
        self.token.check()?;
        let tail = script::tail_log(log_file, seconds);
        let mut lines = match self.sessions.execute_lines(&self.project.host, &tail).await {
            Ok(lines) => lines,
            Err(e) => {
                tracing::warn!("Could not follow {}: {}", log_file, e);
                return Ok(());
            }
        };
        while let Some(event) = lines.next().await {
            match event {
                LineEvent::Line { text, .. } => self.log(text, LogLevel::Info).await,
                // `timeout` ends the tail with 124 on schedule.
                LineEvent::Finished(_) => break,
            }
        }
        Ok(())
    }

    async fn start_supervised(&self, command: &str, name: &str) -> Result<()> {
        let workdir = self.project.working_dir();
        self.log(format!("Starting under pm2: {}", command), LogLevel::Info)
            .await;
        self.query(&script::pm2_delete(name)).await?;
        self.query_checked(&script::pm2_start(name, &workdir, command), command)
            .await?;

        let saved = self.query(&script::pm2_save()).await?;
        if !saved.success() {
            self.log("Could not persist the pm2 process list", LogLevel::Warning)
                .await;
        }

        let described = self.query(&script::pm2_describe(name)).await?;
        if !described.success() {
            return Err(DeployError::StartFailed(name.to_string()));
        }
        self.log(format!("{} is running under pm2", name), LogLevel::Success)
            .await;
        Ok(())
    }

    async fn post_deploy(&self) -> Result<()> {
        let Some(command) = self.project.post_deploy() else {
            return Ok(());
        };
        self.log(format!("Running post-deploy hook: {}", command), LogLevel::Info)
            .await;
        self.run_stage(command, Some(&self.project.working_dir()))
            .await?;
        self.log("Post-deploy hook finished", LogLevel::Success)
            .await;
        Ok(())
    }
}
