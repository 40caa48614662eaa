// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker pool: a bounded set of worker processes keyed by port.
//!
//! The pool owns port allocation and recycling, default-worker adoption,
//! and request forwarding. It enforces no session policy of its own; the
//! session registry decides when workers are started, reused, or evicted.

mod handle;
pub mod http;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

use idaproxy_core::ProxyConfig;

use crate::env;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};

pub use handle::WorkerHandle;

/// Errors from worker lifecycle and forwarding.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker startup failed: {0}")]
    StartupFailed(String),

    #[error("worker on port {0} is not healthy")]
    Unhealthy(u16),

    #[error("request '{method}' to worker on port {port} failed: {cause}")]
    ForwardFailed { port: u16, method: String, cause: String },
}

/// The worker surface the session registry and router depend on.
///
/// Implemented by [`WorkerPool`] for real worker processes and by
/// `FakeBackend` in tests.
#[async_trait]
pub trait WorkerBackend: Send + Sync {
    /// Ports of live workers, ascending.
    fn active_ports(&self) -> Vec<u16>;

    fn worker_count(&self) -> usize;

    /// Port of the default worker, used for the `tools/list` probe.
    fn default_port(&self) -> Option<u16>;

    /// Worker exists and its process is alive. Always true for external
    /// workers; the next forward discovers real failures.
    fn is_healthy(&self, port: u16) -> bool;

    /// Spawn a new worker, optionally preloading a binary. Returns its port.
    async fn start_worker(&self, binary_path: Option<&Path>) -> Result<u16, PoolError>;

    /// Stop a worker and recycle its port. Returns false when unknown.
    async fn stop_worker(&self, port: u16) -> bool;

    /// Forward one JSON-RPC request to a worker's `/mcp` endpoint.
    async fn forward(
        &self,
        port: u16,
        request: &JsonRpcRequest,
        timeout: Option<Duration>,
    ) -> Result<JsonRpcResponse, PoolError>;

    /// Record which binary and worker session a worker now holds.
    fn record_binding(&self, port: u16, binary_path: &Path, worker_session_id: &str);
}

struct PoolState {
    workers: BTreeMap<u16, Arc<WorkerHandle>>,
    available_ports: BTreeSet<u16>,
    next_port: u16,
    default_port: Option<u16>,
}

/// Pool of worker processes keyed by port.
pub struct WorkerPool {
    host: String,
    base_port: u16,
    request_timeout: Duration,
    worker_command: Vec<String>,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            host: config.host.clone(),
            base_port: config.base_port,
            request_timeout: config.request_timeout,
            worker_command: config.worker_command.clone(),
            state: Mutex::new(PoolState {
                workers: BTreeMap::new(),
                available_ports: BTreeSet::new(),
                next_port: config.base_port,
                default_port: None,
            }),
        }
    }

    /// Ensure a default worker is running on the base port, adopting an
    /// externally-started one when present, spawning otherwise.
    pub async fn ensure_default(&self) -> Result<u16, PoolError> {
        {
            let state = self.state.lock();
            if let Some(port) = state.default_port {
                if state.workers.get(&port).is_some_and(|h| h.is_alive()) {
                    return Ok(port);
                }
            }
        }

        // An already-running worker on the base port gets adopted rather
        // than shadowed.
        if handle::probe_ready(&self.host, self.base_port).await {
            info!(port = self.base_port, "found existing worker, adopting as default");
            let mut state = self.state.lock();
            state.workers.insert(self.base_port, Arc::new(WorkerHandle::external(self.base_port)));
            state.default_port = Some(self.base_port);
            state.available_ports.remove(&self.base_port);
            if state.next_port <= self.base_port {
                state.next_port = self.base_port + 1;
            }
            return Ok(self.base_port);
        }

        info!("starting default worker");
        let port = self.start_worker(None).await?;
        self.state.lock().default_port = Some(port);
        Ok(port)
    }

    /// Stop every worker. Owned workers are terminated; external workers
    /// are dropped from the map without being signalled.
    pub async fn stop_all(&self) {
        let ports: Vec<u16> = {
            let state = self.state.lock();
            state.workers.keys().copied().collect()
        };
        info!(count = ports.len(), "stopping all workers");
        for port in ports {
            self.stop_worker(port).await;
        }
    }

    fn allocate_port(&self) -> u16 {
        let mut state = self.state.lock();
        if let Some(port) = state.available_ports.iter().next().copied() {
            state.available_ports.remove(&port);
            return port;
        }
        let port = state.next_port;
        state.next_port += 1;
        port
    }

    fn release_port(&self, port: u16) {
        self.state.lock().available_ports.insert(port);
    }

    fn handle(&self, port: u16) -> Option<Arc<WorkerHandle>> {
        self.state.lock().workers.get(&port).cloned()
    }
}

#[async_trait]
impl WorkerBackend for WorkerPool {
    fn active_ports(&self) -> Vec<u16> {
        self.state.lock().workers.keys().copied().collect()
    }

    fn worker_count(&self) -> usize {
        self.state.lock().workers.len()
    }

    fn default_port(&self) -> Option<u16> {
        self.state.lock().default_port
    }

    fn is_healthy(&self, port: u16) -> bool {
        self.handle(port).is_some_and(|h| h.is_alive())
    }

    async fn start_worker(&self, binary_path: Option<&Path>) -> Result<u16, PoolError> {
        let port = self.allocate_port();
        match WorkerHandle::spawn(
            &self.worker_command,
            &self.host,
            port,
            binary_path,
            env::startup_timeout(),
        )
        .await
        {
            Ok(handle) => {
                info!(port, pid = handle.pid(), "worker started");
                self.state.lock().workers.insert(port, Arc::new(handle));
                Ok(port)
            }
            Err(e) => {
                self.release_port(port);
                Err(e)
            }
        }
    }

    async fn stop_worker(&self, port: u16) -> bool {
        let handle = {
            let mut state = self.state.lock();
            if state.default_port == Some(port) {
                state.default_port = None;
            }
            state.workers.remove(&port)
        };
        let handle = match handle {
            Some(handle) => handle,
            None => {
                warn!(port, "no worker on port");
                return false;
            }
        };

        if handle.is_external() {
            // The external process keeps listening on its port, so the
            // port is not recycled either.
            info!(port, "dropping external worker without terminating");
            return true;
        }

        info!(port, pid = handle.pid(), uptime = ?handle.uptime(), "stopping worker");
        handle.terminate().await;
        self.release_port(port);
        true
    }

    async fn forward(
        &self,
        port: u16,
        request: &JsonRpcRequest,
        timeout: Option<Duration>,
    ) -> Result<JsonRpcResponse, PoolError> {
        if !self.is_healthy(port) {
            return Err(PoolError::Unhealthy(port));
        }

        let forward_failed = |cause: String| PoolError::ForwardFailed {
            port,
            method: request.method.clone(),
            cause,
        };

        let body = serde_json::to_string(request).map_err(|e| forward_failed(e.to_string()))?;
        let timeout = timeout.unwrap_or(self.request_timeout);
        let response = http::post_json(&self.host, port, "/mcp", &body, timeout)
            .await
            .map_err(|e| forward_failed(e.to_string()))?;
        serde_json::from_str(&response).map_err(|e| forward_failed(format!("invalid response: {}", e)))
    }

    fn record_binding(&self, port: u16, binary_path: &Path, worker_session_id: &str) {
        if let Some(handle) = self.handle(port) {
            handle.record_binding(binary_path, worker_session_id);
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
