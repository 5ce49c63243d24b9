// ABOUTME: Scripted in-process stand-in for the SSH transport.
// ABOUTME: Matches commands to canned replies and records everything it was asked to run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deckhand::ssh::{
    self, CommandOutput, Connector, ExecOptions, HostCredentials, OutputChunk, PtyRequest,
    RemoteSession, ShellChannel, ShellCommand, ShellEvent, StreamKind,
};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

/// Exit code a killed stage reports.
pub const KILLED_EXIT_CODE: u32 = 143;

#[derive(Debug, Clone, Copy)]
enum Failure {
    BrokenPipe,
    Timeout,
}

/// Canned result for a matching command.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    exit_code: u32,
    stdout: String,
    stderr: String,
    chunk_size: Option<usize>,
    failure: Option<Failure>,
    until_killed: bool,
}

impl Reply {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn exit(code: u32) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }

    /// The channel drops before an exit status arrives.
    pub fn broken_pipe() -> Self {
        Self {
            failure: Some(Failure::BrokenPipe),
            ..Self::default()
        }
    }

    pub fn timeout() -> Self {
        Self {
            failure: Some(Failure::Timeout),
            ..Self::default()
        }
    }

    /// Streams its output, then hangs until a `kill -TERM` command runs.
    pub fn until_killed() -> Self {
        Self {
            until_killed: true,
            ..Self::default()
        }
    }

    pub fn stdout(mut self, text: &str) -> Self {
        self.stdout = text.to_string();
        self
    }

    pub fn stderr(mut self, text: &str) -> Self {
        self.stderr = text.to_string();
        self
    }

    /// Deliver streamed output in pieces of at most `size` bytes.
    pub fn chunked(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }
}

struct Rule {
    pattern: String,
    reply: Reply,
    remaining: Option<usize>,
}

#[derive(Default)]
struct Inner {
    rules: Mutex<Vec<Rule>>,
    executed: Mutex<Vec<String>>,
    connects: AtomicUsize,
    failing_connects: AtomicUsize,
    closed: AtomicUsize,
    kills: Notify,
}

impl Inner {
    /// Most recently added matching rule wins; unmatched commands succeed silently.
    fn reply_for(&self, command: &str) -> Reply {
        let mut rules = self.rules.lock();
        let Some(index) = rules
            .iter()
            .rposition(|rule| command.contains(&rule.pattern))
        else {
            return Reply::ok();
        };
        let reply = rules[index].reply.clone();
        if let Some(remaining) = rules[index].remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                rules.remove(index);
            }
        }
        reply
    }

    fn record(&self, command: &str) {
        self.executed.lock().push(command.to_string());
        if command.contains("kill -TERM") {
            self.kills.notify_waiters();
        }
    }
}

/// Fake remote host shared by every session it hands out.
#[derive(Clone, Default)]
pub struct FakeRemote {
    inner: Arc<Inner>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    /// Reply to every command containing `pattern`.
    pub fn on(&self, pattern: &str, reply: Reply) -> &Self {
        self.push_rule(pattern, reply, None)
    }

    /// Reply to the next `times` commands containing `pattern`.
    pub fn on_times(&self, pattern: &str, times: usize, reply: Reply) -> &Self {
        self.push_rule(pattern, reply, Some(times.max(1)))
    }

    pub fn on_once(&self, pattern: &str, reply: Reply) -> &Self {
        self.on_times(pattern, 1, reply)
    }

    fn push_rule(&self, pattern: &str, reply: Reply, remaining: Option<usize>) -> &Self {
        self.inner.rules.lock().push(Rule {
            pattern: pattern.to_string(),
            reply,
            remaining,
        });
        self
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_connects(&self, n: usize) {
        self.inner.failing_connects.store(n, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn closed_sessions(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.inner.executed.lock().clone()
    }

    pub fn executed_matching(&self, pattern: &str) -> Vec<String> {
        self.executed()
            .into_iter()
            .filter(|c| c.contains(pattern))
            .collect()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        !self.executed_matching(pattern).is_empty()
    }

    /// Wait until a command containing `pattern` has been issued.
    pub async fn wait_for(&self, pattern: &str) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while !self.ran(pattern) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "no command containing {pattern:?} was run");
    }
}

#[async_trait]
impl Connector for FakeRemote {
    async fn connect(&self, credentials: &HostCredentials) -> ssh::Result<Arc<dyn RemoteSession>> {
        let refused = self
            .inner
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ssh::Error::Connection(format!(
                "{}: connection refused",
                credentials.host
            )));
        }
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeSession {
            inner: self.inner.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct FakeSession {
    inner: Arc<Inner>,
    closed: AtomicBool,
}

fn split(data: &str, size: Option<usize>) -> Vec<Vec<u8>> {
    let bytes = data.as_bytes();
    match size {
        Some(size) => bytes.chunks(size).map(<[u8]>::to_vec).collect(),
        None if bytes.is_empty() => Vec::new(),
        None => vec![bytes.to_vec()],
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn exec(&self, command: &str, opts: ExecOptions) -> ssh::Result<CommandOutput> {
        let killed = self.inner.kills.notified();
        self.inner.record(command);
        let reply = self.inner.reply_for(command);
        match reply.failure {
            Some(Failure::BrokenPipe) => return Err(ssh::Error::ChannelClosed),
            Some(Failure::Timeout) => return Err(ssh::Error::CommandTimeout(opts.timeout)),
            None => {}
        }
        let exit_code = if reply.until_killed {
            killed.await;
            KILLED_EXIT_CODE
        } else {
            reply.exit_code
        };
        Ok(CommandOutput {
            exit_code,
            stdout: reply.stdout,
            stderr: reply.stderr,
        })
    }

    async fn exec_stream(
        &self,
        command: &str,
        chunks: mpsc::UnboundedSender<OutputChunk>,
    ) -> ssh::Result<u32> {
        let killed = self.inner.kills.notified();
        self.inner.record(command);
        let reply = self.inner.reply_for(command);

        for (stream, text) in [
            (StreamKind::Stdout, &reply.stdout),
            (StreamKind::Stderr, &reply.stderr),
        ] {
            for data in split(text, reply.chunk_size) {
                let _ = chunks.send(OutputChunk { stream, data });
            }
        }

        match reply.failure {
            Some(Failure::BrokenPipe) => return Err(ssh::Error::ChannelClosed),
            Some(Failure::Timeout) => {
                return Err(ssh::Error::CommandTimeout(Duration::from_secs(0)));
            }
            None => {}
        }
        if reply.until_killed {
            killed.await;
            return Ok(KILLED_EXIT_CODE);
        }
        Ok(reply.exit_code)
    }

    async fn open_shell(&self, _pty: &PtyRequest) -> ssh::Result<ShellChannel> {
        let (commands, mut command_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();

        // Echo input back until closed.
        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                match command {
                    ShellCommand::Input(data) => {
                        let _ = event_tx.send(ShellEvent::Output(data));
                    }
                    ShellCommand::Resize { .. } => {}
                    ShellCommand::Close => break,
                }
            }
            let _ = event_tx.send(ShellEvent::Closed);
        });

        Ok(ShellChannel { commands, events })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.inner.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
