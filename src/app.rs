// ABOUTME: Application root owning the session pool, engine, fan-out, and sampler.
// ABOUTME: Built once per process from configuration; tests build it over a fake transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::broadcast::Broadcaster;
use crate::config::{Config, Settings, expand_home};
use crate::deploy::{DeployEngine, InboxNotifier, Notifier};
use crate::error::{Error, Result};
use crate::metrics::{MetricsSampler, MetricsSeries};
use crate::ssh::{Connector, SessionManager, SshConnector};
use crate::store::{DeploymentStore, MemoryStore};
use crate::types::{HostId, ProjectId};

/// Interval of the idle connection reaper.
const REAPER_INTERVAL: Duration = Duration::from_secs(30);

/// Process-lifetime state shared by every operation.
#[derive(Debug)]
pub struct App {
    pub store: Arc<MemoryStore>,
    pub sessions: Arc<SessionManager>,
    pub broadcaster: Arc<Broadcaster>,
    pub engine: Arc<DeployEngine>,
    pub sampler: Arc<MetricsSampler>,
    settings: Settings,
}

impl App {
    /// Wire the application with the SSH transport.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut connector = SshConnector::new();
        if let Some(path) = &config.settings.known_hosts {
            connector = connector.known_hosts_path(expand_home(path));
        }
        Self::with_connector(config, Arc::new(connector))
    }

    pub fn with_connector(config: &Config, connector: Arc<dyn Connector>) -> Result<Self> {
        let store = Self::load_store(config)?;
        Ok(Self::with_store(store, connector, config.settings.clone()))
    }

    /// Like [`App::with_connector`], with run outcomes going to `notifier`
    /// instead of the log and the users' inboxes.
    pub fn with_notifier(
        config: &Config,
        connector: Arc<dyn Connector>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let store = Self::load_store(config)?;
        Ok(Self::assemble(
            store,
            connector,
            notifier,
            config.settings.clone(),
        ))
    }

    pub fn with_store(
        store: Arc<MemoryStore>,
        connector: Arc<dyn Connector>,
        settings: Settings,
    ) -> Self {
        let notifier = Arc::new(InboxNotifier::new(store.clone()));
        Self::assemble(store, connector, notifier, settings)
    }

    fn load_store(config: &Config) -> Result<Arc<MemoryStore>> {
        let store = Arc::new(MemoryStore::new());
        for host in config.host_records()? {
            store.add_host(host);
        }
        for project in config.resolve_projects()? {
            store.add_project(project);
        }
        for user in config.user_ids() {
            store.add_user(user);
        }
        Ok(store)
    }

    fn assemble(
        store: Arc<MemoryStore>,
        connector: Arc<dyn Connector>,
        notifier: Arc<dyn Notifier>,
        settings: Settings,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(
            connector,
            store.clone(),
            settings.pool(),
        ));
        let broadcaster = Arc::new(Broadcaster::new(store.clone()));
        let engine = Arc::new(DeployEngine::new(
            sessions.clone(),
            store.clone(),
            broadcaster.clone(),
            notifier,
            settings.engine(),
        ));
        let sampler = Arc::new(MetricsSampler::new(
            sessions.clone(),
            store.clone(),
            broadcaster.clone(),
            Arc::new(MetricsSeries::new(
                settings.metrics_capacity,
                settings.metrics_retention,
            )),
            settings.metrics_interval,
        ));
        Self {
            store,
            sessions,
            broadcaster,
            engine,
            sampler,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Look up a configured project by name.
    pub async fn project_id(&self, name: &str) -> Result<ProjectId> {
        let id = ProjectId::new(name);
        self.store
            .project(&id)
            .await
            .map(|_| id)
            .map_err(|_| Error::UnknownProject(name.to_string()))
    }

    /// Look up a configured host by name.
    pub async fn host_id(&self, name: &str) -> Result<HostId> {
        use crate::ssh::HostDirectory;
        let id = HostId::new(name);
        if self.store.hosts().await.iter().any(|h| h.id == id) {
            Ok(id)
        } else {
            Err(Error::UnknownHost(name.to_string()))
        }
    }

    /// Start the reaper, host health checks, and metrics sampling.
    pub fn spawn_background(&self) -> BackgroundTasks {
        BackgroundTasks(vec![
            self.sessions.clone().spawn_reaper(REAPER_INTERVAL),
            self.sessions
                .clone()
                .spawn_health_checks(self.settings.health_check_interval),
            self.sampler.clone().spawn(),
        ])
    }

    pub async fn shutdown(&self) {
        self.sessions.close_all().await;
    }
}

/// Background loops; aborted when dropped.
#[derive(Debug)]
pub struct BackgroundTasks(Vec<JoinHandle<()>>);

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}
