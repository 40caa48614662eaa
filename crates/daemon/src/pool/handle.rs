// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker process handles: spawning, readiness probing, termination.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use super::{http, PoolError};
use crate::env;
use crate::protocol::JsonRpcRequest;

/// Grace period between SIGTERM and SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Binding {
    /// Binary currently loaded in the worker; empty when idle
    binary_path: PathBuf,
    /// Worker session id for the loaded binary; empty when idle
    worker_session_id: String,
}

/// Owns one worker process (or adopts an external one).
///
/// A handle's port is stable for its lifetime. External handles are never
/// terminated and report alive unconditionally; their real health is
/// discovered on the next forward.
#[derive(Debug)]
pub struct WorkerHandle {
    port: u16,
    pid: u32,
    external: bool,
    started_at: Instant,
    child: tokio::sync::Mutex<Option<Child>>,
    binding: parking_lot::Mutex<Binding>,
}

impl WorkerHandle {
    /// Adopt an externally-started worker already listening on `port`.
    pub fn external(port: u16) -> Self {
        Self {
            port,
            pid: 0,
            external: true,
            started_at: Instant::now(),
            child: tokio::sync::Mutex::new(None),
            binding: parking_lot::Mutex::new(Binding::default()),
        }
    }

    /// Spawn a worker and wait for it to become ready.
    ///
    /// The worker inherits our process group, so group-level signals reach
    /// it along with the proxy.
    pub async fn spawn(
        command: &[String],
        host: &str,
        port: u16,
        binary_path: Option<&Path>,
        startup_timeout: Duration,
    ) -> Result<Self, PoolError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| PoolError::StartupFailed("worker command is empty".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args).arg("--host").arg(host).arg("--port").arg(port.to_string());
        if let Some(path) = binary_path {
            cmd.arg(path);
        }
        cmd.stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        info!(port, command = %command.join(" "), "starting worker");
        let mut child = cmd.spawn().map_err(|e| {
            PoolError::StartupFailed(format!("failed to spawn {}: {}", program, e))
        })?;
        let pid = child.id().unwrap_or(0);

        let started = Instant::now();
        let deadline = started + startup_timeout;
        loop {
            // Worker died before becoming ready: report its stderr
            if matches!(child.try_wait(), Ok(Some(_))) {
                let stderr = read_stderr(&mut child).await;
                return Err(PoolError::StartupFailed(format!(
                    "worker exited during startup: {}",
                    stderr.trim()
                )));
            }

            if probe_ready(host, port).await {
                info!(port, pid, elapsed = ?started.elapsed(), "worker ready");
                break;
            }

            if Instant::now() >= deadline {
                terminate_child(&mut child, pid).await;
                return Err(PoolError::StartupFailed(format!(
                    "worker on port {} failed to become ready within {:?}",
                    port, startup_timeout
                )));
            }

            tokio::time::sleep(env::ready_poll_interval()).await;
        }

        // Keep the pipes drained so a chatty worker never blocks on a full
        // stdout/stderr buffer.
        if let Some(stdout) = child.stdout.take() {
            spawn_output_logger(port, "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_output_logger(port, "stderr", stderr);
        }

        Ok(Self {
            port,
            pid,
            external: false,
            started_at: Instant::now(),
            child: tokio::sync::Mutex::new(Some(child)),
            binding: parking_lot::Mutex::new(Binding::default()),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_external(&self) -> bool {
        self.external
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Binary currently loaded, empty when idle.
    pub fn binary_path(&self) -> PathBuf {
        self.binding.lock().binary_path.clone()
    }

    /// Worker session id for the loaded binary, empty when idle.
    pub fn worker_session_id(&self) -> String {
        self.binding.lock().worker_session_id.clone()
    }

    /// Record which binary and worker session this worker now holds.
    pub fn record_binding(&self, binary_path: &Path, worker_session_id: &str) {
        let mut binding = self.binding.lock();
        binding.binary_path = binary_path.to_path_buf();
        binding.worker_session_id = worker_session_id.to_string();
    }

    /// Whether the worker process is still running.
    ///
    /// Always true for external handles; their health is re-verified on the
    /// next forward.
    pub fn is_alive(&self) -> bool {
        if self.external {
            return true;
        }
        match self.child.try_lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(child) => matches!(child.try_wait(), Ok(None)),
                None => false,
            },
            // Termination in progress
            Err(_) => false,
        }
    }

    /// Terminate the worker and its descendants. Idempotent; a no-op for
    /// external handles and already-dead processes.
    pub async fn terminate(&self) {
        if self.external {
            return;
        }
        let mut guard = self.child.lock().await;
        let child = guard.take();
        drop(guard);
        if let Some(mut child) = child {
            terminate_child(&mut child, self.pid).await;
            info!(port = self.port, pid = self.pid, "worker terminated");
        }
    }
}

/// Probe a worker's `/mcp` endpoint with an `initialize` call.
/// Ready iff the worker answers HTTP 200 within the probe timeout.
pub(crate) async fn probe_ready(host: &str, port: u16) -> bool {
    let request = JsonRpcRequest::new(
        0,
        "initialize",
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {"name": "health-check", "version": "1.0.0"},
        }),
    );
    let body = match serde_json::to_string(&request) {
        Ok(body) => body,
        Err(_) => return false,
    };
    http::post_json(host, port, "/mcp", &body, env::probe_timeout()).await.is_ok()
}

/// Graceful-then-forced termination ladder.
async fn terminate_child(child: &mut Child, pid: u32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::Signal;

        // Collect descendants before signalling so we can re-signal the
        // same set with SIGKILL if the group outlives the grace period.
        let descendants = descendant_pids(pid);
        signal_tree(pid, &descendants, Signal::SIGTERM);

        if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_err() {
            warn!(pid, "worker survived SIGTERM, sending SIGKILL");
            signal_tree(pid, &descendants, Signal::SIGKILL);
            let _ = child.wait().await;
        }
    }

    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
        if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_err() {
            let _ = child.kill().await;
        }
    }
}

/// Signal the worker and every known descendant, ignoring processes that
/// are already gone.
#[cfg(unix)]
fn signal_tree(pid: u32, descendants: &[u32], signal: nix::sys::signal::Signal) {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let _ = kill(Pid::from_raw(pid as i32), signal);
    for &descendant in descendants {
        let _ = kill(Pid::from_raw(descendant as i32), signal);
    }
}

/// Transitive descendants of `root`, found by scanning `/proc/<pid>/stat`
/// parent pids. Best effort: unreadable entries are skipped.
#[cfg(unix)]
fn descendant_pids(root: u32) -> Vec<u32> {
    use std::collections::HashMap;

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    let entries = match std::fs::read_dir("/proc") {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let pid: u32 = match name.to_string_lossy().parse() {
            Ok(pid) => pid,
            Err(_) => continue,
        };
        if let Some(ppid) = parent_pid(pid) {
            children.entry(ppid).or_default().push(pid);
        }
    }

    let mut result = Vec::new();
    let mut queue = vec![root];
    while let Some(pid) = queue.pop() {
        if let Some(kids) = children.get(&pid) {
            for &kid in kids {
                result.push(kid);
                queue.push(kid);
            }
        }
    }
    result
}

/// Parse the ppid out of `/proc/<pid>/stat`. The comm field may contain
/// spaces and parentheses, so split after the last `)`.
#[cfg(unix)]
fn parent_pid(pid: u32) -> Option<u32> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    let after_comm = stat.rsplit_once(')')?.1;
    after_comm.split_whitespace().nth(1).and_then(|s| s.parse().ok())
}

/// Forward a worker output stream to the log, line by line.
fn spawn_output_logger(
    port: u16,
    stream_name: &'static str,
    stream: impl tokio::io::AsyncRead + Unpin + Send + 'static,
) {
    use tokio::io::AsyncBufReadExt;

    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(port, stream = stream_name, "{}", line);
        }
    });
}

/// Drain a dead child's stderr for diagnostics.
async fn read_stderr(child: &mut Child) -> String {
    let mut buf = String::new();
    if let Some(mut stderr) = child.stderr.take() {
        let _ = stderr.read_to_string(&mut buf).await;
    }
    buf
}

#[cfg(test)]
#[path = "handle_tests.rs"]
mod tests;
