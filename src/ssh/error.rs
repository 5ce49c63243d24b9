// ABOUTME: SSH-specific error types.
// ABOUTME: Covers connection, authentication, timeout, and channel failures.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("authentication failed for {user}@{host}")]
    AuthenticationFailed { user: String, host: String },

    #[error("SSH agent not available: {0}")]
    AgentUnavailable(String),

    #[error("failed to load key from {path}: {reason}")]
    KeyLoadFailed { path: PathBuf, reason: String },

    #[error("unknown host: {0}")]
    UnknownHost(String),

    #[error("command execution failed: {0}")]
    CommandFailed(String),

    #[error("command timed out after {0:?}")]
    CommandTimeout(std::time::Duration),

    #[error("channel closed unexpectedly without exit status")]
    ChannelClosed,

    #[error("interactive session closed")]
    SessionClosed,

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("SSH key error: {0}")]
    Key(#[from] russh::keys::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a failed execution may be repeated on a fresh connection.
    ///
    /// Connect and authentication failures surface immediately, and a timed
    /// out command is never repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::CommandFailed(_) | Error::ChannelClosed | Error::Protocol(_) | Error::Io(_)
        )
    }

    /// Whether the error came from establishing the connection itself.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::AuthenticationFailed { .. }
                | Error::AgentUnavailable(_)
                | Error::KeyLoadFailed { .. }
                | Error::Key(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
