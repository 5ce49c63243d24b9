// ABOUTME: Caller-controlled interactive shell on a dedicated connection.
// ABOUTME: Supports input, resize, output/exit events, and close.

use std::sync::Arc;

use super::error::{Error, Result};
use super::transport::{RemoteSession, ShellChannel, ShellCommand, ShellEvent};

/// Handle to an interactive PTY shell.
///
/// The shell owns its own connection; closing (or dropping) the handle tears
/// the connection down.
pub struct ShellSession {
    channel: ShellChannel,
    connection: Arc<dyn RemoteSession>,
    closed: bool,
}

impl std::fmt::Debug for ShellSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellSession")
            .field("closed", &self.closed)
            .finish()
    }
}

impl ShellSession {
    pub(crate) fn new(channel: ShellChannel, connection: Arc<dyn RemoteSession>) -> Self {
        Self {
            channel,
            connection,
            closed: false,
        }
    }

    /// Send keystrokes or pasted input.
    pub fn write(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(ShellCommand::Input(data.into()))
    }

    /// Change the terminal geometry.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        self.send(ShellCommand::Resize { rows, cols })
    }

    /// Next output/exit/error event; `None` once the shell is gone.
    pub async fn next_event(&mut self) -> Option<ShellEvent> {
        self.channel.events.recv().await
    }

    /// Close the shell channel and its connection.
    pub async fn close(mut self) {
        self.closed = true;
        let _ = self.channel.commands.send(ShellCommand::Close);
        self.connection.close().await;
    }

    fn send(&self, command: ShellCommand) -> Result<()> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        self.channel
            .commands
            .send(command)
            .map_err(|_| Error::SessionClosed)
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.channel.commands.send(ShellCommand::Close);
        }
    }
}
