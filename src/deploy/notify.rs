// ABOUTME: Notification seam used when a deployment finishes.
// ABOUTME: External channel dispatch plus per-user in-app notifications.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use crate::store::{Inbox, InboxMessage};
use crate::types::{DeploymentId, ProjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Failure,
}

/// Outcome of a run, addressed to people.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub project: ProjectId,
    pub deployment: DeploymentId,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn success(project: ProjectId, deployment: DeploymentId, name: &str) -> Self {
        Self {
            kind: NotificationKind::Success,
            title: format!("{} deployed", name),
            message: format!("Deployment of {} is running", name),
            project,
            deployment,
        }
    }

    pub fn failure(
        project: ProjectId,
        deployment: DeploymentId,
        name: &str,
        error: &str,
    ) -> Self {
        Self {
            kind: NotificationKind::Failure,
            title: format!("{} deployment failed", name),
            message: error.to_string(),
            project,
            deployment,
        }
    }
}

/// Delivery of run outcomes. Failures are the notifier's own concern and
/// never reach the pipeline.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Dispatch to external channels.
    async fn send(&self, notification: &Notification);

    /// Create an in-app notification for every user.
    async fn notify_users(&self, notification: &Notification);
}

/// Writes notifications to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, notification: &Notification) {
        match notification.kind {
            NotificationKind::Success => tracing::info!(
                project = %notification.project,
                deployment = %notification.deployment,
                "{}", notification.title
            ),
            NotificationKind::Failure => tracing::error!(
                project = %notification.project,
                deployment = %notification.deployment,
                "{}: {}", notification.title, notification.message
            ),
        }
    }

    async fn notify_users(&self, _notification: &Notification) {}
}

/// Logs external notifications and stores in-app ones in an [`Inbox`].
pub struct InboxNotifier {
    inbox: Arc<dyn Inbox>,
}

impl std::fmt::Debug for InboxNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboxNotifier").finish_non_exhaustive()
    }
}

impl InboxNotifier {
    pub fn new(inbox: Arc<dyn Inbox>) -> Self {
        Self { inbox }
    }
}

#[async_trait]
impl Notifier for InboxNotifier {
    async fn send(&self, notification: &Notification) {
        TracingNotifier.send(notification).await;
    }

    async fn notify_users(&self, notification: &Notification) {
        let created_at = Utc::now();
        for user in self.inbox.users().await {
            let message = InboxMessage {
                title: notification.title.clone(),
                message: notification.message.clone(),
                project: notification.project.clone(),
                deployment: notification.deployment.clone(),
                created_at,
                read: false,
            };
            if let Err(e) = self.inbox.deliver(&user, message).await {
                tracing::warn!("Failed to deliver notification to {}: {}", user, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::UserId;

    #[tokio::test]
    async fn every_user_gets_an_inbox_entry() {
        let store = Arc::new(MemoryStore::new());
        store.add_user(UserId::new("alice"));
        store.add_user(UserId::new("bob"));
        let notifier = InboxNotifier::new(store.clone());

        let notification = Notification::success(
            ProjectId::new("api"),
            DeploymentId::new("d1"),
            "api",
        );
        notifier.notify_users(&notification).await;

        for user in ["alice", "bob"] {
            let messages = store.messages(&UserId::new(user)).await;
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].title, "api deployed");
            assert!(!messages[0].read);
        }
    }

    #[test]
    fn failure_carries_error_text() {
        let n = Notification::failure(
            ProjectId::new("api"),
            DeploymentId::new("d1"),
            "api",
            "Command failed with exit code 3: exit 3",
        );
        assert_eq!(n.kind, NotificationKind::Failure);
        assert!(n.message.contains("exit code 3"));
    }
}
