// ABOUTME: Transport seam between the session manager and the SSH client.
// ABOUTME: Defines the connector/session traits and the data they exchange.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::Result;
use super::host::HostCredentials;

/// Default wall-clock bound for one-shot commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(15);

/// Output from a remote command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code of the command.
    pub exit_code: u32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Options for a one-shot command.
#[derive(Debug, Clone, Copy)]
pub struct ExecOptions {
    pub timeout: Duration,
    /// Attach a pseudo-terminal to the command channel.
    pub pty: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
            pty: false,
        }
    }
}

impl ExecOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn pty(mut self, pty: bool) -> Self {
        self.pty = pty;
        self
    }
}

/// Which output stream a chunk arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// A piece of output from a streaming command, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: StreamKind,
    pub data: Vec<u8>,
}

/// Terminal geometry requested for an interactive shell.
#[derive(Debug, Clone)]
pub struct PtyRequest {
    pub rows: u16,
    pub cols: u16,
    pub term: String,
}

impl Default for PtyRequest {
    fn default() -> Self {
        Self {
            rows: 24,
            cols: 80,
            term: "xterm-256color".to_string(),
        }
    }
}

/// Instructions sent from a shell handle to the task owning the channel.
#[derive(Debug)]
pub enum ShellCommand {
    Input(Vec<u8>),
    Resize { rows: u16, cols: u16 },
    Close,
}

/// Events produced by an interactive shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    Output(Vec<u8>),
    Exit(u32),
    Error(String),
    Closed,
}

/// The two halves of a running interactive shell channel.
pub struct ShellChannel {
    pub commands: mpsc::UnboundedSender<ShellCommand>,
    pub events: mpsc::UnboundedReceiver<ShellEvent>,
}

/// One authenticated transport session to a remote host.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a command to completion.
    ///
    /// On timeout the command channel is closed and
    /// [`Error::CommandTimeout`](super::Error::CommandTimeout) is returned.
    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<CommandOutput>;

    /// Run a command, forwarding output chunks as they arrive.
    ///
    /// Returns the exit code once the remote side closes the channel.
    async fn exec_stream(
        &self,
        command: &str,
        chunks: mpsc::UnboundedSender<OutputChunk>,
    ) -> Result<u32>;

    /// Open a login shell with a pseudo-terminal attached.
    async fn open_shell(&self, pty: &PtyRequest) -> Result<ShellChannel>;

    /// Whether the underlying transport has gone away.
    fn is_closed(&self) -> bool;

    /// Disconnect, ignoring errors.
    async fn close(&self);
}

/// Establishes authenticated sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, credentials: &HostCredentials) -> Result<Arc<dyn RemoteSession>>;
}
