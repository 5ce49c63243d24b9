// ABOUTME: Session manager owning one pooled connection per remote host.
// ABOUTME: Runs one-shot commands with retry-once, streaming commands, and shells.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::error::Result;
use super::host::{HostDirectory, HostStatus};
use super::shell::ShellSession;
use super::stream::{CommandStream, LineStream, StreamEvent};
use super::transport::{
    CommandOutput, Connector, DEFAULT_COMMAND_TIMEOUT, ExecOptions, PtyRequest, RemoteSession,
};
use crate::types::HostId;

/// Idle time after which a pooled connection is closed.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(5 * 60);

/// Pool tuning.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub idle_ttl: Duration,
    pub command_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            idle_ttl: DEFAULT_IDLE_TTL,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

struct PooledConnection {
    session: Arc<dyn RemoteSession>,
    last_used: Instant,
    in_flight: Arc<AtomicUsize>,
}

impl PooledConnection {
    fn new(session: Arc<dyn RemoteSession>) -> Self {
        Self {
            session,
            last_used: Instant::now(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Idle means no command is running on it and none ran within `ttl`.
    fn is_idle(&self, ttl: Duration) -> bool {
        self.in_flight.load(Ordering::Acquire) == 0 && self.last_used.elapsed() >= ttl
    }

    fn lease(&mut self) -> Lease {
        self.last_used = Instant::now();
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Lease {
            session: self.session.clone(),
            in_flight: self.in_flight.clone(),
        }
    }
}

/// A checked-out pooled session. The connection counts as busy until the
/// lease is dropped.
struct Lease {
    session: Arc<dyn RemoteSession>,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One slot per host. The async mutex serializes connection establishment
/// for that host; it is never held while a command runs.
type Slot = Arc<AsyncMutex<Option<PooledConnection>>>;

/// Hides per-host transport setup and teardown.
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    hosts: Arc<dyn HostDirectory>,
    settings: PoolSettings,
    slots: Mutex<HashMap<HostId, Slot>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("settings", &self.settings)
            .field("hosts", &self.slots.lock().len())
            .finish()
    }
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        hosts: Arc<dyn HostDirectory>,
        settings: PoolSettings,
    ) -> Self {
        Self {
            connector,
            hosts,
            settings,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Run a command with the default timeout.
    pub async fn run(&self, host: &HostId, command: &str) -> Result<CommandOutput> {
        self.execute(
            host,
            command,
            ExecOptions::default().timeout(self.settings.command_timeout),
        )
        .await
    }

    /// Run a command to completion on the pooled connection.
    ///
    /// A timeout is returned as-is. Any other execution failure evicts the
    /// pooled connection and the command is attempted once more on a fresh
    /// one; a second failure propagates.
    pub async fn execute(
        &self,
        host: &HostId,
        command: &str,
        opts: ExecOptions,
    ) -> Result<CommandOutput> {
        let lease = self.checkout(host).await?;
        let err = match lease.session.exec(command, opts).await {
            Ok(output) => {
                self.touch(host, &lease.session).await;
                return Ok(output);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };

        tracing::warn!(
            "Command on {} failed ({}), retrying on a fresh connection",
            host,
            err
        );
        self.evict(host, &lease.session).await;
        drop(lease);

        let lease = self.checkout(host).await?;
        match lease.session.exec(command, opts).await {
            Ok(output) => {
                self.touch(host, &lease.session).await;
                Ok(output)
            }
            Err(e) => {
                if e.is_retryable() {
                    self.evict(host, &lease.session).await;
                }
                Err(e)
            }
        }
    }

    /// Run a command on a dedicated connection, streaming its output.
    pub async fn execute_streaming(&self, host: &HostId, command: &str) -> Result<CommandStream> {
        let session = self.connect_dedicated(host).await?;
        let (events, receiver) = mpsc::unbounded_channel();
        let command = command.to_string();

        tokio::spawn(async move {
            let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
            let forward = async {
                while let Some(chunk) = chunk_rx.recv().await {
                    let _ = events.send(StreamEvent::Chunk(chunk));
                }
            };
            let (result, ()) = tokio::join!(session.exec_stream(&command, chunk_tx), forward);
            let _ = events.send(StreamEvent::Finished(result));
            session.close().await;
        });

        Ok(CommandStream::new(receiver))
    }

    /// Like [`execute_streaming`](Self::execute_streaming), re-assembled into lines.
    pub async fn execute_lines(&self, host: &HostId, command: &str) -> Result<LineStream> {
        Ok(self.execute_streaming(host, command).await?.lines())
    }

    /// Open an interactive PTY shell on its own connection.
    pub async fn open_shell(&self, host: &HostId, pty: PtyRequest) -> Result<ShellSession> {
        let session = self.connect_dedicated(host).await?;
        match session.open_shell(&pty).await {
            Ok(channel) => Ok(ShellSession::new(channel, session)),
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    /// Probe a host and record whether it answered.
    pub async fn check_host(&self, host: &HostId) -> HostStatus {
        let status = match self.run(host, "echo ok").await {
            Ok(output) if output.success() => HostStatus::Online,
            Ok(output) => {
                tracing::warn!("Host {} probe exited with {}", host, output.exit_code);
                HostStatus::Offline
            }
            Err(e) => {
                tracing::warn!("Host {} unreachable: {}", host, e);
                HostStatus::Offline
            }
        };
        self.hosts.record_status(host, status, Utc::now()).await;
        status
    }

    /// Probe every known host concurrently.
    pub async fn check_all_hosts(&self) -> Vec<(HostId, HostStatus)> {
        let hosts = self.hosts.hosts().await;
        let checks = hosts.into_iter().map(|summary| async move {
            let status = self.check_host(&summary.id).await;
            (summary.id, status)
        });
        futures::future::join_all(checks).await
    }

    /// Periodically probe all hosts until the handle is aborted.
    pub fn spawn_health_checks(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.check_all_hosts().await;
            }
        })
    }

    /// Close pooled connections idle beyond the TTL, never one with a command
    /// still running. Returns how many closed.
    pub async fn reap_idle(&self) -> usize {
        let mut reaped = 0;
        for (host, slot) in self.snapshot() {
            // A busy slot is being checked out right now, so it is not idle.
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            let expired = guard
                .as_ref()
                .is_some_and(|conn| conn.is_idle(self.settings.idle_ttl));
            if expired && let Some(conn) = guard.take() {
                tracing::debug!("Closing idle connection to {}", host);
                conn.session.close().await;
                reaped += 1;
            }
        }
        reaped
    }

    /// Periodically reap idle connections until the handle is aborted.
    pub fn spawn_reaper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.reap_idle().await;
            }
        })
    }

    /// Hosts that currently hold a pooled connection.
    pub async fn pooled_hosts(&self) -> Vec<HostId> {
        let mut hosts = Vec::new();
        for (host, slot) in self.snapshot() {
            if slot.lock().await.is_some() {
                hosts.push(host);
            }
        }
        hosts
    }

    /// Close every pooled connection.
    pub async fn close_all(&self) {
        for (_, slot) in self.snapshot() {
            if let Some(conn) = slot.lock().await.take() {
                conn.session.close().await;
            }
        }
    }

    fn slot(&self, host: &HostId) -> Slot {
        self.slots.lock().entry(host.clone()).or_default().clone()
    }

    fn snapshot(&self) -> Vec<(HostId, Slot)> {
        self.slots
            .lock()
            .iter()
            .map(|(host, slot)| (host.clone(), slot.clone()))
            .collect()
    }

    /// Get the pooled connection for a host, establishing one if needed.
    async fn checkout(&self, host: &HostId) -> Result<Lease> {
        let slot = self.slot(host);
        let mut guard = slot.lock().await;

        if let Some(conn) = guard.as_mut() {
            if conn.session.is_closed() {
                tracing::debug!("Pooled connection to {} was closed, reconnecting", host);
            } else if conn.is_idle(self.settings.idle_ttl) {
                tracing::debug!("Pooled connection to {} expired, reconnecting", host);
                conn.session.close().await;
            } else {
                return Ok(conn.lease());
            }
        }
        *guard = None;

        let session = self.connect_dedicated(host).await?;
        let mut conn = PooledConnection::new(session);
        let lease = conn.lease();
        *guard = Some(conn);
        Ok(lease)
    }

    async fn connect_dedicated(&self, host: &HostId) -> Result<Arc<dyn RemoteSession>> {
        let credentials = self.hosts.credentials(host).await?;
        self.connector.connect(&credentials).await
    }

    /// Extend the idle timer of the connection that just served a command.
    async fn touch(&self, host: &HostId, session: &Arc<dyn RemoteSession>) {
        let slot = self.slot(host);
        let mut guard = slot.lock().await;
        if let Some(conn) = guard.as_mut()
            && Arc::ptr_eq(&conn.session, session)
        {
            conn.last_used = Instant::now();
        }
    }

    /// Drop the pooled connection if it is still the one that failed.
    async fn evict(&self, host: &HostId, session: &Arc<dyn RemoteSession>) {
        let slot = self.slot(host);
        let mut guard = slot.lock().await;
        let same = guard
            .as_ref()
            .is_some_and(|conn| Arc::ptr_eq(&conn.session, session));
        if same && let Some(conn) = guard.take() {
            tracing::debug!("Evicting pooled connection to {}", host);
            conn.session.close().await;
        }
    }
}
