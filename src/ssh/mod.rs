// ABOUTME: Remote session manager for SSH-reachable hosts.
// ABOUTME: Pooled one-shot execution, streaming execution, and interactive shells.

mod client;
mod error;
mod host;
mod pool;
mod shell;
mod stream;
mod transport;

pub use client::{SessionConfig, SshConnector, SshSession};
pub use error::{Error, Result};
pub use host::{HostAuth, HostCredentials, HostDirectory, HostStatus, HostSummary};
pub use pool::{DEFAULT_IDLE_TTL, PoolSettings, SessionManager};
pub use shell::ShellSession;
pub use stream::{CommandStream, LineBuffer, LineEvent, LineStream, StreamEvent};
pub use transport::{
    CommandOutput, Connector, DEFAULT_COMMAND_TIMEOUT, ExecOptions, OutputChunk, PtyRequest,
    RemoteSession, ShellChannel, ShellCommand, ShellEvent, StreamKind,
};
