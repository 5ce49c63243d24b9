// ABOUTME: Notifier that records every dispatch for later inspection.
// ABOUTME: Lets tests assert which outcomes were announced and through which channel.

use async_trait::async_trait;
use deckhand::deploy::{Notification, Notifier};
use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    in_app: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything dispatched to external channels, in order.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    /// Everything fanned out to users' inboxes, in order.
    pub fn in_app(&self) -> Vec<Notification> {
        self.in_app.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) {
        self.sent.lock().push(notification.clone());
    }

    async fn notify_users(&self, notification: &Notification) {
        self.in_app.lock().push(notification.clone());
    }
}
