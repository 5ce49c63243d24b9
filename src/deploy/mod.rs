// ABOUTME: Deploy pipeline engine with per-unit mutual exclusion and cancellation.
// ABOUTME: Exports the engine, its records and status machine, and the notifier seam.

mod engine;
mod error;
mod model;
mod notify;
mod pipeline;
mod registry;
pub mod script;
mod status;
mod strategy;

pub use engine::{
    DEFAULT_CANCEL_POLL_ATTEMPTS, DEFAULT_CANCEL_POLL_INTERVAL, DEFAULT_START_PROBE_WINDOW,
    DeployEngine, EngineSettings,
};
pub use error::{CANCELLED_MESSAGE, DeployError};
pub use model::{
    CommitInfo, Deployment, LogEntry, LogLevel, OutputSync, ProcessManager, Project, Trigger,
};
pub use notify::{InboxNotifier, Notification, NotificationKind, Notifier, TracingNotifier};
pub use registry::{ActiveGuard, ActiveRun, CancelToken, DeployRegistry};
pub use status::DeployStatus;
pub use strategy::StartStrategy;

#[cfg(test)]
pub(crate) use model::fixtures;
