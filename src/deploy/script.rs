// ABOUTME: Remote shell command builders for pipeline stages.
// ABOUTME: Quoting, PID marker wrapping, git, env files, output sync, and process control.

use std::collections::BTreeMap;

use super::model::CommitInfo;
use crate::types::UnitName;

/// Base directory for deckhand state files on the remote host.
/// Uses $HOME so paths must be double-quoted, never single-quoted.
pub const STATE_DIR: &str = "$HOME/.local/state/deckhand";

/// Separator between fields of the commit summary format.
const COMMIT_FIELD_SEP: char = '\u{1f}';

const ENV_DELIMITER: &str = "DECKHAND_ENV_EOF";

/// Quote a value for POSIX sh.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// PID marker of the stage command currently running for a unit.
pub fn stage_pid_file(name: &UnitName) -> String {
    format!("{}/{}.stage.pid", STATE_DIR, name)
}

/// PID file of a detached unit process.
pub fn app_pid_file(name: &UnitName) -> String {
    format!("{}/{}.pid", STATE_DIR, name)
}

/// Output log of a detached unit process.
pub fn app_log_file(name: &UnitName) -> String {
    format!("{}/{}.log", STATE_DIR, name)
}

/// Run `command` from `workdir`.
pub fn in_dir(workdir: &str, command: &str) -> String {
    format!("cd {} && {}", quote(workdir), command)
}

/// Wrap a stage command so its process group is recorded in `pid_file`
/// while it runs. The marker is removed when the command exits and the
/// command's exit code is preserved.
pub fn wrap_stage(workdir: Option<&str>, command: &str, pid_file: &str) -> String {
    let cd = workdir
        .map(|dir| format!("cd {} && ", quote(dir)))
        .unwrap_or_default();
    format!(
        "mkdir -p \"{state}\" && {cd}setsid sh -c 'echo $$ > \"$1\"; exec sh -c \"$2\"' deckhand \"{pid}\" {cmd}; code=$?; rm -f \"{pid}\"; exit $code",
        state = STATE_DIR,
        cd = cd,
        pid = pid_file,
        cmd = quote(command),
    )
}

/// Signal the process group recorded in a PID file. Never fails.
pub fn kill_pid_file(pid_file: &str) -> String {
    format!(
        "if [ -f \"{pid}\" ]; then pid=$(cat \"{pid}\"); kill -TERM -- -$pid 2>/dev/null || kill -TERM $pid 2>/dev/null; rm -f \"{pid}\"; fi; true",
        pid = pid_file
    )
}

/// What lives at the deploy path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoState {
    /// A working git checkout.
    Repository,
    /// Something exists but it is not a usable checkout.
    Partial,
    Absent,
}

pub fn probe_repo(path: &str) -> String {
    let p = quote(path);
    format!(
        "if [ -d {p}/.git ] && git -C {p} rev-parse --is-inside-work-tree >/dev/null 2>&1; then echo repository; elif [ -e {p} ]; then echo partial; else echo absent; fi",
        p = p
    )
}

pub fn parse_repo_state(stdout: &str) -> RepoState {
    match stdout.trim() {
        "repository" => RepoState::Repository,
        "partial" => RepoState::Partial,
        _ => RepoState::Absent,
    }
}

/// Update an existing checkout to the tip of `branch`.
pub fn pull(path: &str, branch: &str) -> String {
    let b = quote(branch);
    format!(
        "cd {} && git fetch origin {b} && git checkout -f {b} && git pull origin {b}",
        quote(path),
        b = b
    )
}

/// Replace whatever is at `path` with a shallow clone of `branch`.
pub fn fresh_clone(repository: &str, branch: &str, path: &str) -> String {
    let p = quote(path);
    format!(
        "rm -rf {p} && mkdir -p \"$(dirname {p})\" && git clone --depth 1 --branch {b} {r} {p}",
        p = p,
        b = quote(branch),
        r = quote(repository),
    )
}

/// Fetch full history and check out an explicit commit.
pub fn checkout_commit(path: &str, commit: &str) -> String {
    format!(
        "cd {} && (git fetch --unshallow origin 2>/dev/null || git fetch origin) && git checkout -f {}",
        quote(path),
        quote(commit)
    )
}

/// Whether a string looks like an abbreviated or full commit hash.
pub fn is_commit_hash(value: &str) -> bool {
    (4..=40).contains(&value.len()) && value.chars().all(|c| c.is_ascii_hexdigit())
}

pub fn commit_info(path: &str) -> String {
    format!("git -C {} log -1 --format='%h%x1f%s%x1f%an'", quote(path))
}

pub fn parse_commit_info(stdout: &str) -> Option<CommitInfo> {
    let line = stdout.lines().find(|l| !l.trim().is_empty())?;
    let mut fields = line.trim_end().splitn(3, COMMIT_FIELD_SEP);
    let hash = fields.next()?.trim();
    if hash.is_empty() {
        return None;
    }
    Some(CommitInfo {
        hash: hash.to_string(),
        message: fields.next().unwrap_or_default().to_string(),
        author: fields.next().unwrap_or_default().to_string(),
    })
}

/// Write `.env` in `workdir` through a quoted heredoc so values are not
/// subject to shell expansion. The terminator never matches a body line.
pub fn write_env(workdir: &str, env: &BTreeMap<String, String>) -> String {
    let mut body = String::new();
    for (key, value) in env {
        body.push_str(key);
        body.push('=');
        body.push_str(value);
        body.push('\n');
    }
    let delim = heredoc_delimiter(&body);
    format!(
        "mkdir -p {dir} && cat > {dir}/.env <<'{delim}'\n{body}{delim}\n",
        dir = quote(workdir),
    )
}

fn heredoc_delimiter(body: &str) -> String {
    let mut delim = ENV_DELIMITER.to_string();
    let mut n = 0u32;
    while body.lines().any(|line| line == delim) {
        n += 1;
        delim = format!("{ENV_DELIMITER}_{n}");
    }
    delim
}

/// Mirror `source` into `destination`, deleting stale files.
pub fn sync_output(source: &str, destination: &str) -> String {
    format!(
        "mkdir -p {dest} && rsync -a --delete {src}/ {dest}/",
        src = quote(source.trim_end_matches('/')),
        dest = quote(destination.trim_end_matches('/')),
    )
}

/// Launch `command` in its own session in the background, recording its PID.
pub fn start_detached(workdir: &str, command: &str, pid_file: &str, log_file: &str) -> String {
    format!(
        "mkdir -p \"{state}\" && cd {dir} && : > \"{log}\" && {{ setsid nohup sh -c {cmd} >> \"{log}\" 2>&1 < /dev/null & echo $! > \"{pid}\"; }}",
        state = STATE_DIR,
        dir = quote(workdir),
        cmd = quote(command),
        log = log_file,
        pid = pid_file,
    )
}

/// Follow a log file for a bounded number of seconds.
pub fn tail_log(log_file: &str, seconds: u64) -> String {
    format!("timeout {} tail -n +1 -f \"{}\"", seconds, log_file)
}

/// Last `lines` lines of a log file.
pub fn read_log(log_file: &str, lines: usize) -> String {
    format!("tail -n {} \"{}\"", lines, log_file)
}

/// Exit 0 only if the process recorded in `pid_file` is alive.
pub fn process_alive(pid_file: &str) -> String {
    format!(
        "kill -0 \"$(cat \"{pid}\" 2>/dev/null)\" 2>/dev/null",
        pid = pid_file
    )
}

pub fn pm2_delete(name: &str) -> String {
    format!("pm2 delete {} >/dev/null 2>&1; true", name)
}

pub fn pm2_start(name: &str, workdir: &str, command: &str) -> String {
    format!(
        "cd {dir} && pm2 start {cmd} --name {name} --cwd {dir}",
        dir = quote(workdir),
        cmd = quote(command),
        name = name,
    )
}

pub fn pm2_save() -> String {
    "pm2 save".to_string()
}

pub fn pm2_describe(name: &str) -> String {
    format!("pm2 describe {} >/dev/null 2>&1", name)
}

pub fn pm2_logs(name: &str, lines: usize) -> String {
    format!("pm2 logs {} --lines {} --nostream", name, lines)
}

pub fn pm2_stop(name: &str) -> String {
    format!("pm2 stop {} >/dev/null 2>&1; true", name)
}
