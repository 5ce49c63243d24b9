// ABOUTME: Event fan-out to push rooms, pull subscriptions, and the deployment log.
// ABOUTME: Delivery is best-effort; a subscriber that cannot accept an event is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::deploy::{DeployStatus, LogEntry, LogLevel};
use crate::metrics::MetricsSample;
use crate::store::DeploymentStore;
use crate::types::{DeploymentId, HostId, ProjectId};

/// Buffered events per subscriber before it is considered stalled.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1024;

/// One logical event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    LogLine {
        deployment: DeploymentId,
        project: ProjectId,
        text: String,
        level: LogLevel,
        timestamp: DateTime<Utc>,
    },
    StatusChanged {
        deployment: DeploymentId,
        project: ProjectId,
        status: DeployStatus,
    },
    Metrics {
        host: HostId,
        sample: MetricsSample,
    },
}

impl Event {
    /// Name used as the SSE `event:` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::LogLine { .. } => "log",
            Event::StatusChanged { .. } => "status",
            Event::Metrics { .. } => "metrics",
        }
    }

    /// Render as a server-sent events frame.
    pub fn to_sse(&self) -> Option<String> {
        let data = serde_json::to_string(self).ok()?;
        Some(format!("event: {}\ndata: {}\n\n", self.kind(), data))
    }
}

/// Scope of a push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    Deployment(DeploymentId),
    Project(ProjectId),
    Host(HostId),
}

#[derive(Debug)]
struct Subscriber<T> {
    id: u64,
    sender: mpsc::Sender<T>,
}

/// Deliver to every subscriber, dropping those that are gone or stalled.
fn deliver<T: Clone>(subscribers: &mut Vec<Subscriber<T>>, item: &T, scope: &dyn std::fmt::Debug) {
    subscribers.retain(|subscriber| match subscriber.sender.try_send(item.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!("Dropping stalled subscriber {} of {:?}", subscriber.id, scope);
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!("Subscriber {} of {:?} went away", subscriber.id, scope);
            false
        }
    });
}

fn prune_closed<K, T>(subscribers: &mut HashMap<K, Vec<Subscriber<T>>>) {
    subscribers.retain(|_, list| {
        list.retain(|s| !s.sender.is_closed());
        !list.is_empty()
    });
}

/// Multiplexes events across the push and pull transports and persists log lines.
pub struct Broadcaster {
    store: Arc<dyn DeploymentStore>,
    rooms: Mutex<HashMap<Room, Vec<Subscriber<Event>>>>,
    streams: Mutex<HashMap<ProjectId, Vec<Subscriber<String>>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("rooms", &self.rooms.lock().len())
            .field("streams", &self.streams.lock().len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl Broadcaster {
    pub fn new(store: Arc<dyn DeploymentStore>) -> Self {
        Self::with_capacity(store, DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn with_capacity(store: Arc<dyn DeploymentStore>, capacity: usize) -> Self {
        Self {
            store,
            rooms: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Join a push room. Subscribers that went away since the last publish
    /// are dropped from every room first.
    pub fn subscribe(&self, room: Room) -> mpsc::Receiver<Event> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut rooms = self.rooms.lock();
        prune_closed(&mut rooms);
        rooms
            .entry(room)
            .or_default()
            .push(Subscriber { id, sender });
        receiver
    }

    /// Open a pull subscription for a project; yields SSE frames.
    pub fn subscribe_stream(&self, project: &ProjectId) -> mpsc::Receiver<String> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut streams = self.streams.lock();
        prune_closed(&mut streams);
        streams
            .entry(project.clone())
            .or_default()
            .push(Subscriber { id, sender });
        receiver
    }

    pub fn room_size(&self, room: &Room) -> usize {
        self.rooms.lock().get(room).map_or(0, Vec::len)
    }

    pub fn stream_count(&self, project: &ProjectId) -> usize {
        self.streams.lock().get(project).map_or(0, Vec::len)
    }

    /// Publish a deployment log line and append it to the record.
    pub async fn log_line(
        &self,
        deployment: &DeploymentId,
        project: &ProjectId,
        text: impl Into<String>,
        level: LogLevel,
    ) {
        let entry = LogEntry::new(text, level);
        let event = Event::LogLine {
            deployment: deployment.clone(),
            project: project.clone(),
            text: entry.text.clone(),
            level,
            timestamp: entry.timestamp,
        };
        self.publish(
            &[
                Room::Deployment(deployment.clone()),
                Room::Project(project.clone()),
            ],
            &event,
        );
        self.publish_stream(project, &event);

        if let Err(e) = self.store.append_log(deployment, entry).await {
            tracing::warn!("Failed to persist log line for {}: {}", deployment, e);
        }
    }

    pub fn status_changed(
        &self,
        deployment: &DeploymentId,
        project: &ProjectId,
        status: DeployStatus,
    ) {
        let event = Event::StatusChanged {
            deployment: deployment.clone(),
            project: project.clone(),
            status,
        };
        self.publish(
            &[
                Room::Deployment(deployment.clone()),
                Room::Project(project.clone()),
            ],
            &event,
        );
        self.publish_stream(project, &event);
    }

    pub fn metrics_sample(&self, host: &HostId, sample: MetricsSample) {
        let event = Event::Metrics {
            host: host.clone(),
            sample,
        };
        self.publish(&[Room::Host(host.clone())], &event);
    }

    fn publish(&self, rooms: &[Room], event: &Event) {
        let mut all = self.rooms.lock();
        for room in rooms {
            if let Some(subscribers) = all.get_mut(room) {
                deliver(subscribers, event, room);
                if subscribers.is_empty() {
                    all.remove(room);
                }
            }
        }
    }

    fn publish_stream(&self, project: &ProjectId, event: &Event) {
        let Some(frame) = event.to_sse() else {
            tracing::warn!("Failed to encode {} event for {}", event.kind(), project);
            return;
        };
        let mut streams = self.streams.lock();
        if let Some(subscribers) = streams.get_mut(project) {
            deliver(subscribers, &frame, project);
            if subscribers.is_empty() {
                streams.remove(project);
            }
        }
    }
}
