// ABOUTME: Deploy trigger surface: deploy, rollback, cancel, stop, and restart.
// ABOUTME: Enforces one active run per unit and records each run's terminal outcome.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::broadcast::Broadcaster;
use crate::ssh::SessionManager;
use crate::store::DeploymentStore;
use crate::types::{DeploymentId, ProjectId, UserId};

use super::error::DeployError;
use super::model::{Deployment, LogLevel, Project, Trigger};
use super::notify::{Notification, Notifier};
use super::pipeline::Pipeline;
use super::registry::{ActiveGuard, DeployRegistry};
use super::script;
use super::status::DeployStatus;
use super::strategy::StartStrategy;

type Result<T> = std::result::Result<T, DeployError>;

pub const DEFAULT_CANCEL_POLL_ATTEMPTS: u32 = 30;
pub const DEFAULT_CANCEL_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_START_PROBE_WINDOW: Duration = Duration::from_secs(10);

/// Engine tuning.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// How many times to check whether a superseded run released its slot.
    pub cancel_poll_attempts: u32,
    pub cancel_poll_interval: Duration,
    /// How long a detached start is watched before checking it survived.
    pub start_probe_window: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cancel_poll_attempts: DEFAULT_CANCEL_POLL_ATTEMPTS,
            cancel_poll_interval: DEFAULT_CANCEL_POLL_INTERVAL,
            start_probe_window: DEFAULT_START_PROBE_WINDOW,
        }
    }
}

/// Drives deployable units through the pipeline.
pub struct DeployEngine {
    sessions: Arc<SessionManager>,
    store: Arc<dyn DeploymentStore>,
    broadcaster: Arc<Broadcaster>,
    notifier: Arc<dyn Notifier>,
    registry: Arc<DeployRegistry>,
    settings: EngineSettings,
}

impl std::fmt::Debug for DeployEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployEngine")
            .field("settings", &self.settings)
            .field("active", &self.registry.active_count())
            .finish_non_exhaustive()
    }
}

impl DeployEngine {
    pub fn new(
        sessions: Arc<SessionManager>,
        store: Arc<dyn DeploymentStore>,
        broadcaster: Arc<Broadcaster>,
        notifier: Arc<dyn Notifier>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            sessions,
            store,
            broadcaster,
            notifier,
            registry: Arc::new(DeployRegistry::new()),
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<DeployRegistry> {
        &self.registry
    }

    pub fn is_active(&self, project: &ProjectId) -> bool {
        self.registry.is_active(project)
    }

    /// Start a deployment of the unit's tracked branch.
    ///
    /// Returns once the record exists; the pipeline runs in the background.
    pub async fn deploy(
        self: &Arc<Self>,
        project: &ProjectId,
        trigger: Trigger,
        user: Option<UserId>,
    ) -> Result<DeploymentId> {
        self.launch(project, trigger, user, None).await
    }

    /// Redeploy an explicit commit.
    pub async fn rollback(
        self: &Arc<Self>,
        project: &ProjectId,
        commit: &str,
        user: Option<UserId>,
    ) -> Result<DeploymentId> {
        if !script::is_commit_hash(commit) {
            return Err(DeployError::InvalidCommit(commit.to_string()));
        }
        self.launch(project, Trigger::Manual, user, Some(commit.to_string()))
            .await
    }

    /// Stop and deploy again.
    pub async fn restart(
        self: &Arc<Self>,
        project: &ProjectId,
        user: Option<UserId>,
    ) -> Result<DeploymentId> {
        self.stop(project).await;
        self.deploy(project, Trigger::Manual, user).await
    }

    /// Request cancellation of the unit's active run and signal its current
    /// remote stage. Returns `false` if nothing was running.
    pub async fn cancel(&self, project: &ProjectId) -> bool {
        let Some(run) = self.registry.request_cancel(project) else {
            return false;
        };
        tracing::info!("Cancelling deployment {} of {}", run.deployment, run.unit);
        let kill = script::kill_pid_file(&script::stage_pid_file(&run.unit));
        if let Err(e) = self.sessions.run(&run.host, &kill).await {
            tracing::warn!("Could not signal stage of {}: {}", run.unit, e);
        }
        true
    }

    /// Stop the unit's process. Never fails; problems are logged.
    pub async fn stop(&self, project: &ProjectId) {
        let project = match self.store.project(project).await {
            Ok(project) => project,
            Err(e) => {
                tracing::warn!("Cannot stop {}: {}", project, e);
                return;
            }
        };

        if let Some(stop) = project.stop() {
            let command = script::in_dir(&project.working_dir(), stop);
            match self.sessions.run(&project.host, &command).await {
                Ok(output) if !output.success() => tracing::warn!(
                    "Stop command for {} exited {}",
                    project.name,
                    output.exit_code
                ),
                Ok(_) => {}
                Err(e) => tracing::warn!("Stop command for {} failed: {}", project.name, e),
            }
        }

        let strategy = StartStrategy::for_project(&project);
        if let Err(e) = self
            .sessions
            .run(&project.host, &strategy.stop_command())
            .await
        {
            tracing::warn!("Could not stop process of {}: {}", project.name, e);
        }

        if let Err(e) = self
            .store
            .set_project_status(&project.id, DeployStatus::Stopped)
            .await
        {
            tracing::warn!("Could not mark {} stopped: {}", project.name, e);
        }

        match self.store.latest_deployment(&project.id).await {
            Ok(Some(latest)) if latest.status == DeployStatus::Running => {
                match self
                    .store
                    .set_deployment_status(&latest.id, DeployStatus::Stopped)
                    .await
                {
                    Ok(()) => self.broadcaster.status_changed(
                        &latest.id,
                        &project.id,
                        DeployStatus::Stopped,
                    ),
                    Err(e) => tracing::warn!("Could not mark {} stopped: {}", latest.id, e),
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Could not load history of {}: {}", project.name, e),
        }
        tracing::info!("Stopped {}", project.name);
    }

    async fn launch(
        self: &Arc<Self>,
        project: &ProjectId,
        trigger: Trigger,
        user: Option<UserId>,
        target_commit: Option<String>,
    ) -> Result<DeploymentId> {
        let project = self.store.project(project).await?;
        self.supersede(&project).await?;

        let mut deployment = Deployment::new(&project, trigger, user);
        deployment.target_commit = target_commit.clone();
        let id = deployment.id.clone();

        let guard = self
            .registry
            .try_claim(&project.id, &project.name, &project.host, &id)
            .ok_or_else(|| DeployError::AlreadyActive(project.id.clone()))?;

        self.store.create_deployment(deployment).await?;
        if let Err(e) = self
            .store
            .set_project_status(&project.id, DeployStatus::Pending)
            .await
        {
            tracing::warn!("Failed to mirror status onto {}: {}", project.name, e);
        }
        self.broadcaster
            .status_changed(&id, &project.id, DeployStatus::Pending);
        tracing::info!(project = %project.name, deployment = %id, ?trigger, "Deployment queued");

        let engine = Arc::clone(self);
        let run_id = id.clone();
        tokio::spawn(async move {
            engine.run(project, run_id, target_commit, guard).await;
        });
        Ok(id)
    }

    /// Make room for a new run: cancel the active one and wait for it to
    /// release the unit's slot.
    async fn supersede(&self, project: &Project) -> Result<()> {
        if !self.registry.is_active(&project.id) {
            return Ok(());
        }
        self.cancel(&project.id).await;

        for _ in 0..self.settings.cancel_poll_attempts {
            if !self.registry.is_active(&project.id) {
                return Ok(());
            }
            tokio::time::sleep(self.settings.cancel_poll_interval).await;
        }
        if self.registry.is_active(&project.id) {
            return Err(DeployError::CancelTimeout(project.id.clone()));
        }
        Ok(())
    }

    async fn run(
        self: Arc<Self>,
        project: Project,
        deployment: DeploymentId,
        target_commit: Option<String>,
        guard: ActiveGuard,
    ) {
        let result = {
            let mut pipeline = Pipeline::new(
                &self.sessions,
                self.store.as_ref(),
                &self.broadcaster,
                &self.settings,
                &project,
                &deployment,
                guard.token().clone(),
                target_commit.as_deref(),
            );
            pipeline.execute().await
        };
        self.finalize(&project, &deployment, result).await;
        drop(guard);
    }

    /// Record the run's outcome. The only place terminal state is written.
    async fn finalize(&self, project: &Project, deployment: &DeploymentId, result: Result<()>) {
        let finished_at = Utc::now();
        let (status, error) = match &result {
            Ok(()) => {
                self.broadcaster
                    .log_line(deployment, &project.id, "Deployment successful", LogLevel::Success)
                    .await;
                (DeployStatus::Running, None)
            }
            Err(err) if err.is_cancelled() => {
                self.broadcaster
                    .log_line(deployment, &project.id, "Deployment cancelled", LogLevel::Warning)
                    .await;
                (DeployStatus::Cancelled, Some(err.to_string()))
            }
            Err(err) => {
                tracing::error!(project = %project.name, deployment = %deployment, "Deployment failed: {}", err);
                self.broadcaster
                    .log_line(
                        deployment,
                        &project.id,
                        format!("Deployment failed: {}", err),
                        LogLevel::Error,
                    )
                    .await;
                (err.terminal_status(), Some(err.to_string()))
            }
        };

        if let Err(e) = self
            .store
            .finish_deployment(deployment, status, error.clone(), finished_at)
            .await
        {
            tracing::error!("Failed to record outcome of {}: {}", deployment, e);
        }
        if let Err(e) = self.store.set_project_status(&project.id, status).await {
            tracing::warn!("Failed to mirror status onto {}: {}", project.name, e);
        }
        if status == DeployStatus::Running
            && let Err(e) = self.store.mark_deployed(&project.id, finished_at).await
        {
            tracing::warn!("Failed to stamp deploy time of {}: {}", project.name, e);
        }
        self.broadcaster
            .status_changed(deployment, &project.id, status);

        match (status, error) {
            (DeployStatus::Running, _) => {
                let notification =
                    Notification::success(project.id.clone(), deployment.clone(), project.name.as_str());
                self.notifier.send(&notification).await;
                self.notifier.notify_users(&notification).await;
            }
            (DeployStatus::Failed, Some(error)) => {
                let notification = Notification::failure(
                    project.id.clone(),
                    deployment.clone(),
                    project.name.as_str(),
                    &error,
                );
                self.notifier.send(&notification).await;
            }
            _ => {}
        }
    }
}
