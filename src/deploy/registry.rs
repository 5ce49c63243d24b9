// ABOUTME: In-process registry of active deployments, one per unit.
// ABOUTME: Claims release on drop; cancel requests flow through a shared token.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::error::DeployError;
use crate::types::{DeploymentId, HostId, ProjectId, UnitName};

/// Cooperative cancellation flag shared between a run and its canceller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// `Err(Cancelled)` if cancellation was requested.
    pub fn check(&self) -> Result<(), DeployError> {
        if self.is_cancelled() {
            Err(DeployError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Snapshot of a run holding a unit's slot.
#[derive(Debug, Clone)]
pub struct ActiveRun {
    pub deployment: DeploymentId,
    pub unit: UnitName,
    pub host: HostId,
    pub token: CancelToken,
    pub started_at: DateTime<Utc>,
}

/// Which units currently have a run in flight.
#[derive(Debug, Default)]
pub struct DeployRegistry {
    active: Mutex<HashMap<ProjectId, ActiveRun>>,
}

impl DeployRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the unit's slot. `None` if another run holds it.
    pub fn try_claim(
        self: &Arc<Self>,
        project: &ProjectId,
        unit: &UnitName,
        host: &HostId,
        deployment: &DeploymentId,
    ) -> Option<ActiveGuard> {
        let mut active = self.active.lock();
        if active.contains_key(project) {
            return None;
        }
        let token = CancelToken::new();
        active.insert(
            project.clone(),
            ActiveRun {
                deployment: deployment.clone(),
                unit: unit.clone(),
                host: host.clone(),
                token: token.clone(),
                started_at: Utc::now(),
            },
        );
        Some(ActiveGuard {
            registry: Arc::clone(self),
            project: project.clone(),
            deployment: deployment.clone(),
            token,
        })
    }

    pub fn is_active(&self, project: &ProjectId) -> bool {
        self.active.lock().contains_key(project)
    }

    pub fn active(&self, project: &ProjectId) -> Option<ActiveRun> {
        self.active.lock().get(project).cloned()
    }

    /// Flag the unit's active run as cancelled. Returns the run if one exists.
    pub fn request_cancel(&self, project: &ProjectId) -> Option<ActiveRun> {
        let active = self.active.lock();
        let run = active.get(project)?;
        run.token.cancel();
        Some(run.clone())
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    fn release(&self, project: &ProjectId, deployment: &DeploymentId) {
        let mut active = self.active.lock();
        if active
            .get(project)
            .is_some_and(|run| &run.deployment == deployment)
        {
            active.remove(project);
        }
    }
}

/// Held for the lifetime of a run; frees the unit's slot when dropped.
#[derive(Debug)]
pub struct ActiveGuard {
    registry: Arc<DeployRegistry>,
    project: ProjectId,
    deployment: DeploymentId,
    token: CancelToken,
}

impl ActiveGuard {
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn deployment(&self) -> &DeploymentId {
        &self.deployment
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.registry.release(&self.project, &self.deployment);
    }
}
