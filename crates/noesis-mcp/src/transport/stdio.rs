//! Child-process transport.
//!
//! Spawns the server through the platform shell and speaks
//! newline-delimited JSON over its stdin/stdout. Stderr is forwarded to the
//! log and never interpreted.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use noesis_core::ServerConfig;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{method_not_found_frame, route_inbound, Inbound, PendingRequests, RpcCore, SHUTDOWN_GRACE};
use crate::error::{McpError, TransportError};
use crate::framing::LineBuffer;
use crate::protocol::ClientInfo;

type SharedStdin = Arc<AsyncMutex<Option<ChildStdin>>>;

/// Standard I/O transport for MCP servers.
pub struct StdioTransport {
    pub(super) core: RpcCore,
    pub(super) client_info: ClientInfo,
    config: Arc<ServerConfig>,
    child: AsyncMutex<Option<Child>>,
    stdin: SharedStdin,
    alive: Arc<AtomicBool>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl StdioTransport {
    pub(super) fn new(core: RpcCore, config: Arc<ServerConfig>, client_info: ClientInfo) -> Self {
        Self {
            core,
            client_info,
            config,
            child: AsyncMutex::new(None),
            stdin: Arc::new(AsyncMutex::new(None)),
            alive: Arc::new(AtomicBool::new(false)),
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub(super) async fn open(&self) -> Result<(), McpError> {
        let server = self.core.server().to_string();
        let line = shell_command_line(&self.config.command, &self.config.args);
        debug!(server = %server, command = %line, "Spawning MCP server process");

        let mut cmd = shell_command(&line);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // The shell may fork the server as its own child, so the pair gets
        // a process group that terminate() can signal as a whole.
        #[cfg(unix)]
        cmd.process_group(0);

        // Host environment is inherited; PATH gains the usual tool
        // directories unless the server config sets PATH itself.
        if !self.config.env.contains_key("PATH") {
            cmd.env("PATH", augmented_path(std::env::var_os("PATH")));
        }
        cmd.envs(&self.config.env);

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let spawn_error = |source: std::io::Error| McpError::Spawn {
            command: self.config.command.clone(),
            source,
        };

        let mut child = cmd.spawn().map_err(spawn_error)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::other("failed to capture stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::other("failed to capture stdout")))?;
        let stderr = child.stderr.take();

        *self.stdin.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);
        self.alive.store(true, Ordering::SeqCst);

        let mut tasks = vec![tokio::spawn(read_stdout(
            server.clone(),
            stdout,
            Arc::clone(self.core.pending()),
            Arc::clone(&self.stdin),
            Arc::clone(&self.alive),
        ))];
        if let Some(stderr) = stderr {
            tasks.push(tokio::spawn(log_stderr(server.clone(), stderr)));
        }
        self.tasks.lock().extend(tasks);

        debug!(server = %server, "MCP server process spawned");
        Ok(())
    }

    pub(super) async fn write(&self, frame: &str) -> Result<(), TransportError> {
        if !self.is_live() {
            return Err(TransportError::NotConnected);
        }
        write_line(&self.stdin, frame).await
    }

    pub(super) async fn close(&self) -> Result<(), TransportError> {
        self.alive.store(false, Ordering::SeqCst);
        // Dropping stdin closes the pipe, which is enough for many servers.
        self.stdin.lock().await.take();

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            terminate(self.core.server(), &mut child).await;
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        Ok(())
    }

    pub(super) fn is_live(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

async fn write_line(stdin: &AsyncMutex<Option<ChildStdin>>, frame: &str) -> Result<(), TransportError> {
    let mut guard = stdin.lock().await;
    let stdin = guard.as_mut().ok_or(TransportError::NotConnected)?;

    stdin
        .write_all(frame.as_bytes())
        .await
        .map_err(TransportError::WriteError)?;
    stdin.write_all(b"\n").await.map_err(TransportError::WriteError)?;
    stdin.flush().await.map_err(TransportError::WriteError)?;
    Ok(())
}

async fn read_stdout(
    server: String,
    mut stdout: ChildStdout,
    pending: Arc<PendingRequests>,
    stdin: SharedStdin,
    alive: Arc<AtomicBool>,
) {
    let mut lines = LineBuffer::new();
    let mut chunk = vec![0u8; 8192];

    loop {
        let read = match stdout.read(&mut chunk).await {
            Ok(0) => {
                debug!(server = %server, "MCP server closed stdout");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(server = %server, error = %TransportError::ReadError(e), "Reading from MCP server failed");
                break;
            }
        };

        for line in lines.feed(&chunk[..read]) {
            if let Inbound::ServerRequest { id, method } = route_inbound(&server, &line, &pending) {
                let reply = method_not_found_frame(id, &method);
                let sent = match reply {
                    Ok(frame) => write_line(&stdin, &frame).await.map_err(McpError::from),
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    warn!(server = %server, method = %method, error = %e, "Could not answer server request");
                }
            }
        }
    }

    if lines.has_partial() {
        debug!(server = %server, bytes = lines.remainder().len(), "Discarding partial line at EOF");
    }
    alive.store(false, Ordering::SeqCst);
    let failed = pending.fail_all(|| TransportError::ConnectionClosed.into());
    if failed > 0 {
        warn!(server = %server, failed, "MCP server went away with requests in flight");
    }
}

async fn log_stderr(server: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(server = %server, stderr = %line, "MCP server stderr"),
            Ok(None) => break,
            Err(e) => {
                debug!(server = %server, error = %e, "Stopped reading MCP server stderr");
                break;
            }
        }
    }
}

/// Ask the child's process group to exit, killing it if it ignores the
/// request.
async fn terminate(server: &str, child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };

    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        // The group id equals the shell's pid after process_group(0).
        let group = Pid::from_raw(pid as i32);
        debug!(server, pid, "Sending SIGTERM to MCP server process group");
        if let Err(e) = killpg(group, Signal::SIGTERM) {
            debug!(server, pid, error = %e, "SIGTERM failed");
        }

        tokio::select! {
            status = child.wait() => {
                debug!(server, ?status, "MCP server exited gracefully");
                return;
            }
            _ = tokio::time::sleep(SHUTDOWN_GRACE) => {
                warn!(server, pid, "MCP server did not exit gracefully, killing");
            }
        }

        if let Err(e) = killpg(group, Signal::SIGKILL) {
            debug!(server, pid, error = %e, "SIGKILL failed");
        }
    }

    if let Err(e) = child.kill().await {
        warn!(server, pid, error = %e, "Failed to kill MCP server");
    }
}

/// Build the shell command line for a server.
///
/// The command itself is passed through untouched so the shell can resolve
/// it and interpret any operators it contains; arguments are quoted.
pub fn shell_command_line(command: &str, args: &[String]) -> String {
    let mut line = command.trim().to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&quote_arg(arg));
    }
    line
}

#[cfg(unix)]
fn quote_arg(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(not(unix))]
fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"']) {
        arg.to_string()
    } else {
        format!("\"{}\"", arg.replace('"', "\\\""))
    }
}

fn shell_command(line: &str) -> Command {
    #[cfg(unix)]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(line);
        cmd
    }
    #[cfg(not(unix))]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(line);
        cmd
    }
}

/// Append common tool directories to `PATH` when they exist and are missing.
///
/// GUI hosts are often started with a minimal PATH, so launchers such as
/// `npx` or `uvx` would not resolve without this.
pub fn augmented_path(current: Option<OsString>) -> OsString {
    let mut paths: Vec<PathBuf> = current
        .as_ref()
        .map(|p| std::env::split_paths(p).collect())
        .unwrap_or_default();

    if cfg!(unix) {
        let mut candidates: Vec<PathBuf> = ["/usr/local/bin", "/opt/homebrew/bin", "/usr/bin", "/bin"]
            .iter()
            .map(PathBuf::from)
            .collect();
        if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
            candidates.push(home.join(".local/bin"));
            candidates.push(home.join(".cargo/bin"));
        }
        for candidate in candidates {
            if candidate.is_dir() && !paths.contains(&candidate) {
                paths.push(candidate);
            }
        }
    }

    std::env::join_paths(&paths).unwrap_or_else(|_| current.unwrap_or_default())
}
