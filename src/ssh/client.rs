// ABOUTME: SSH session implementation using russh.
// ABOUTME: Handles connection, authentication, one-shot, streaming, and PTY channels.

use super::error::{Error, Result};
use super::host::{HostAuth, HostCredentials};
use super::transport::{
    CommandOutput, Connector, ExecOptions, OutputChunk, PtyRequest, RemoteSession, ShellChannel,
    ShellCommand, ShellEvent, StreamKind,
};
use async_trait::async_trait;
use russh::client::{self, Config, Handle, Msg};
use russh::keys::agent::client::AgentClient;
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key, ssh_key};
use russh::{Channel, ChannelMsg, Disconnect};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::sync::mpsc;

/// Exit code reported when the remote process was killed by a signal.
const SIGNALED_EXIT_CODE: u32 = 255;

/// Connection parameters for one SSH session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Remote host to connect to.
    pub host: String,
    /// SSH port (default: 22).
    pub port: u16,
    /// Username for authentication.
    pub user: String,
    /// Whether to accept unknown hosts (Trust On First Use).
    pub trust_on_first_use: bool,
    /// Optional path to known_hosts file.
    /// If None, uses the default ~/.ssh/known_hosts.
    pub known_hosts_path: Option<PathBuf>,
    /// Transport-level inactivity timeout.
    pub inactivity_timeout: Duration,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            trust_on_first_use: false,
            known_hosts_path: None,
            inactivity_timeout: Duration::from_secs(600),
        }
    }

    pub fn for_host(credentials: &HostCredentials) -> Self {
        Self::new(&credentials.host, &credentials.user)
            .port(credentials.port)
            .trust_on_first_use(credentials.trust_first_connection)
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn trust_on_first_use(mut self, tofu: bool) -> Self {
        self.trust_on_first_use = tofu;
        self
    }

    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }
}

/// SSH client handler for russh.
pub(crate) struct SshHandler {
    host: String,
    port: u16,
    trust_on_first_use: bool,
    known_hosts_path: Option<PathBuf>,
}

impl SshHandler {
    fn check(&self, key: &ssh_key::PublicKey) -> std::result::Result<bool, russh::keys::Error> {
        match &self.known_hosts_path {
            Some(path) => check_known_hosts_path(&self.host, self.port, key, path),
            None => check_known_hosts(&self.host, self.port, key),
        }
    }

    fn learn(&self, key: &ssh_key::PublicKey) {
        let learned = match &self.known_hosts_path {
            Some(path) => learn_known_hosts_path(&self.host, self.port, key, path),
            None => learn_known_hosts(&self.host, self.port, key),
        };
        if let Err(e) = learned {
            tracing::warn!("Failed to save host key to known_hosts: {}", e);
        }
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match self.check(server_public_key) {
            Ok(true) => Ok(true),
            Ok(false) if self.trust_on_first_use => {
                tracing::warn!(
                    "Trust-On-First-Use: accepting unknown host key for {}:{}",
                    self.host,
                    self.port
                );
                self.learn(server_public_key);
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(russh::keys::Error::KeyChanged { line }) => {
                tracing::error!(
                    "Host key for {}:{} changed (known_hosts line {})",
                    self.host,
                    self.port,
                    line
                );
                Ok(false)
            }
            Err(_) => Ok(self.trust_on_first_use),
        }
    }
}

/// Authentication method resolved from the host record.
enum AuthMethod<'a> {
    Password(&'a SecretString),
    Agent(AgentClient<UnixStream>),
    KeyFile(Arc<ssh_key::PrivateKey>),
}

/// An established SSH session.
pub struct SshSession {
    config: SessionConfig,
    handle: Handle<SshHandler>,
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("config", &self.config)
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

impl SshSession {
    /// Connect and authenticate.
    pub async fn connect(config: SessionConfig, auth: &HostAuth) -> Result<Self> {
        let auth_method = Self::resolve_auth_method(auth).await?;

        let russh_config = Config {
            inactivity_timeout: Some(config.inactivity_timeout),
            ..Default::default()
        };

        let handler = SshHandler {
            host: config.host.clone(),
            port: config.port,
            trust_on_first_use: config.trust_on_first_use,
            known_hosts_path: config.known_hosts_path.clone(),
        };

        tracing::debug!("Connecting to {}@{}:{}", config.user, config.host, config.port);

        let mut handle = client::connect(
            Arc::new(russh_config),
            (config.host.as_str(), config.port),
            handler,
        )
        .await
        .map_err(|e| {
            if e.to_string().contains("Connection refused") {
                Error::Connection(format!(
                    "connection refused to {}:{}",
                    config.host, config.port
                ))
            } else {
                Error::Connection(format!("{}:{}: {}", config.host, config.port, e))
            }
        })?;

        if !Self::authenticate(&mut handle, &config, auth_method).await? {
            return Err(Error::AuthenticationFailed {
                user: config.user.clone(),
                host: config.host.clone(),
            });
        }

        Ok(Self { config, handle })
    }

    /// Resolve which authentication method to use.
    async fn resolve_auth_method(auth: &HostAuth) -> Result<AuthMethod<'_>> {
        match auth {
            HostAuth::Password(password) => Ok(AuthMethod::Password(password)),
            HostAuth::Key { path, passphrase } => {
                let key = load_key(path, passphrase.as_ref())?;
                Ok(AuthMethod::KeyFile(Arc::new(key)))
            }
            HostAuth::Agent => {
                if let Ok(agent) = AgentClient::connect_env().await {
                    return Ok(AuthMethod::Agent(agent));
                }

                let home = std::env::var("HOME").map_err(|_| {
                    Error::AgentUnavailable("SSH agent not available and HOME not set".to_string())
                })?;

                for name in ["id_ed25519", "id_rsa", "id_ecdsa"] {
                    let key_path = PathBuf::from(&home).join(".ssh").join(name);
                    if let Ok(key) = load_secret_key(&key_path, None) {
                        return Ok(AuthMethod::KeyFile(Arc::new(key)));
                    }
                }

                Err(Error::AgentUnavailable(
                    "SSH agent not available and no default keys found".to_string(),
                ))
            }
        }
    }

    async fn authenticate(
        handle: &mut Handle<SshHandler>,
        config: &SessionConfig,
        auth_method: AuthMethod<'_>,
    ) -> Result<bool> {
        match auth_method {
            AuthMethod::Password(password) => {
                let result = handle
                    .authenticate_password(&config.user, password.expose_secret())
                    .await?;
                Ok(result.success())
            }
            AuthMethod::Agent(mut agent) => {
                let keys = agent.request_identities().await.map_err(|e| {
                    Error::AgentUnavailable(format!("failed to list agent keys: {}", e))
                })?;

                if keys.is_empty() {
                    return Err(Error::AgentUnavailable("no keys in SSH agent".to_string()));
                }

                for key in &keys {
                    match handle
                        .authenticate_publickey_with(&config.user, key.clone(), None, &mut agent)
                        .await
                    {
                        Ok(result) if result.success() => return Ok(true),
                        _ => continue,
                    }
                }
                Ok(false)
            }
            AuthMethod::KeyFile(key) => {
                let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
                let result = handle
                    .authenticate_publickey(&config.user, PrivateKeyWithHashAlg::new(key, hash_alg))
                    .await?;
                Ok(result.success())
            }
        }
    }

    async fn open_channel(&self) -> Result<Channel<Msg>> {
        self.handle
            .channel_open_session()
            .await
            .map_err(|e| Error::CommandFailed(format!("failed to open channel: {}", e)))
    }
}

fn load_key(path: &Path, passphrase: Option<&SecretString>) -> Result<ssh_key::PrivateKey> {
    load_secret_key(path, passphrase.map(|p| p.expose_secret())).map_err(|e| {
        Error::KeyLoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<CommandOutput> {
        let mut channel = self.open_channel().await?;

        if opts.pty {
            channel
                .request_pty(false, "xterm", 200, 50, 0, 0, &[])
                .await
                .map_err(|e| Error::CommandFailed(format!("failed to request pty: {}", e)))?;
        }

        channel
            .exec(true, command)
            .await
            .map_err(|e| Error::CommandFailed(format!("failed to exec command: {}", e)))?;

        match tokio::time::timeout(opts.timeout, collect_output(&mut channel)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "Command on {} exceeded {:?}, closing channel",
                    self.config.host,
                    opts.timeout
                );
                let _ = channel.close().await;
                Err(Error::CommandTimeout(opts.timeout))
            }
        }
    }

    async fn exec_stream(
        &self,
        command: &str,
        chunks: mpsc::UnboundedSender<OutputChunk>,
    ) -> Result<u32> {
        let mut channel = self.open_channel().await?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| Error::CommandFailed(format!("failed to exec command: {}", e)))?;

        let mut exit_code = None;
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    let _ = chunks.send(OutputChunk {
                        stream: StreamKind::Stdout,
                        data: data.to_vec(),
                    });
                }
                Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => {
                    let _ = chunks.send(OutputChunk {
                        stream: StreamKind::Stderr,
                        data: data.to_vec(),
                    });
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => exit_code = Some(exit_status),
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    tracing::debug!("Streaming command killed by signal {:?}", signal_name);
                    exit_code = Some(SIGNALED_EXIT_CODE);
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }

        exit_code.ok_or(Error::ChannelClosed)
    }

    async fn open_shell(&self, pty: &PtyRequest) -> Result<ShellChannel> {
        let channel = self.open_channel().await?;
        channel
            .request_pty(
                true,
                &pty.term,
                u32::from(pty.cols),
                u32::from(pty.rows),
                0,
                0,
                &[],
            )
            .await
            .map_err(|e| Error::CommandFailed(format!("failed to request pty: {}", e)))?;
        channel
            .request_shell(true)
            .await
            .map_err(|e| Error::CommandFailed(format!("failed to start shell: {}", e)))?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive_shell(channel, command_rx, event_tx));

        Ok(ShellChannel {
            commands: command_tx,
            events: event_rx,
        })
    }

    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    async fn close(&self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!("Disconnect from {} failed: {}", self.config.host, e);
        }
    }
}

/// Drain a command channel until both the exit status and EOF have arrived.
async fn collect_output(channel: &mut Channel<Msg>) -> Result<CommandOutput> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_code = None;
    let mut got_eof = false;

    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
            Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => {
                stderr.extend_from_slice(&data)
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                exit_code = Some(exit_status);
                if got_eof {
                    break;
                }
            }
            Some(ChannelMsg::ExitSignal { .. }) => {
                exit_code = Some(SIGNALED_EXIT_CODE);
                if got_eof {
                    break;
                }
            }
            Some(ChannelMsg::Eof) => {
                got_eof = true;
                if exit_code.is_some() {
                    break;
                }
            }
            Some(ChannelMsg::Close) | None => break,
            Some(_) => {}
        }
    }

    // A channel that closes without an exit status was torn down underneath us.
    let exit_code = exit_code.ok_or(Error::ChannelClosed)?;

    Ok(CommandOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
    })
}

/// Own an interactive channel, relaying handle commands and channel output.
async fn drive_shell(
    mut channel: Channel<Msg>,
    mut commands: mpsc::UnboundedReceiver<ShellCommand>,
    events: mpsc::UnboundedSender<ShellEvent>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(ShellCommand::Input(bytes)) => {
                    if let Err(e) = channel.data(&bytes[..]).await {
                        let _ = events.send(ShellEvent::Error(e.to_string()));
                        break;
                    }
                }
                Some(ShellCommand::Resize { rows, cols }) => {
                    if let Err(e) = channel
                        .window_change(u32::from(cols), u32::from(rows), 0, 0)
                        .await
                    {
                        let _ = events.send(ShellEvent::Error(e.to_string()));
                    }
                }
                Some(ShellCommand::Close) | None => {
                    let _ = channel.eof().await;
                    let _ = channel.close().await;
                    break;
                }
            },
            message = channel.wait() => match message {
                Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                    let _ = events.send(ShellEvent::Output(data.to_vec()));
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    let _ = events.send(ShellEvent::Exit(exit_status));
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
        }
    }

    let _ = events.send(ShellEvent::Closed);
}

/// Opens russh sessions for host records.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    known_hosts_path: Option<PathBuf>,
}

impl SshConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, credentials: &HostCredentials) -> Result<Arc<dyn RemoteSession>> {
        let mut config = SessionConfig::for_host(credentials);
        if let Some(path) = &self.known_hosts_path {
            config = config.known_hosts_path(path);
        }
        let session = SshSession::connect(config, &credentials.auth).await?;
        Ok(Arc::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_config_copies_host_record() {
        let credentials = HostCredentials {
            id: crate::types::HostId::new("web1"),
            host: "web1.example.com".to_string(),
            port: 2222,
            user: "deploy".to_string(),
            auth: HostAuth::Agent,
            trust_first_connection: true,
        };

        let config = SessionConfig::for_host(&credentials);
        assert_eq!(config.host, "web1.example.com");
        assert_eq!(config.port, 2222);
        assert_eq!(config.user, "deploy");
        assert!(config.trust_on_first_use);
        assert!(config.known_hosts_path.is_none());
    }

    #[test]
    fn missing_key_file_reports_path() {
        let err = load_key(Path::new("/nonexistent/key/path"), None).unwrap_err();
        assert!(
            matches!(err, Error::KeyLoadFailed { ref path, .. } if path == Path::new("/nonexistent/key/path")),
            "expected KeyLoadFailed, got: {:?}",
            err
        );
    }
}
