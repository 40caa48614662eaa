// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake worker backend for deterministic testing
#![cfg_attr(coverage_nightly, coverage(off))]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::{PoolError, WorkerBackend};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};

/// Recorded forward call.
#[derive(Debug, Clone)]
pub struct ForwardCall {
    pub port: u16,
    pub request: JsonRpcRequest,
}

struct FakeWorker {
    healthy: bool,
    binary_path: PathBuf,
    worker_session_id: String,
}

struct FakeState {
    workers: BTreeMap<u16, FakeWorker>,
    available_ports: BTreeSet<u16>,
    next_port: u16,
    default_port: Option<u16>,
    /// Worker session ids handed out by `idalib_open`, in order
    scripted_session_ids: VecDeque<String>,
    generated: usize,
    spawn_count: usize,
    stop_count: usize,
    spawn_error: Option<String>,
    open_error: Option<String>,
    /// Tools reported by workers on `tools/list`
    tools: Vec<Value>,
    forwards: Vec<ForwardCall>,
}

/// Fake worker backend: no processes, scripted responses, recorded calls.
#[derive(Clone)]
pub struct FakeBackend {
    inner: Arc<Mutex<FakeState>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new(8745)
    }
}

impl FakeBackend {
    pub fn new(base_port: u16) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeState {
                workers: BTreeMap::new(),
                available_ports: BTreeSet::new(),
                next_port: base_port,
                default_port: None,
                scripted_session_ids: VecDeque::new(),
                generated: 0,
                spawn_count: 0,
                stop_count: 0,
                spawn_error: None,
                open_error: None,
                tools: Vec::new(),
                forwards: Vec::new(),
            })),
        }
    }

    /// Queue worker session ids to return from successive `idalib_open`s.
    pub fn script_session_ids(&self, ids: &[&str]) {
        let mut state = self.inner.lock();
        state.scripted_session_ids.extend(ids.iter().map(|s| s.to_string()));
    }

    /// Add a default worker with no session, as `ensure_default` would.
    pub fn with_default_worker(self) -> Self {
        {
            let mut state = self.inner.lock();
            let port = state.next_port;
            state.next_port += 1;
            state.workers.insert(
                port,
                FakeWorker {
                    healthy: true,
                    binary_path: PathBuf::new(),
                    worker_session_id: String::new(),
                },
            );
            state.default_port = Some(port);
        }
        self
    }

    /// Set the tools workers report from `tools/list`.
    pub fn set_worker_tools(&self, tools: Vec<Value>) {
        self.inner.lock().tools = tools;
    }

    /// Make the next `start_worker` fail.
    pub fn fail_next_spawn(&self, message: &str) {
        self.inner.lock().spawn_error = Some(message.to_string());
    }

    /// Make the next `idalib_open` forward report a worker-side failure.
    pub fn fail_next_open(&self, message: &str) {
        self.inner.lock().open_error = Some(message.to_string());
    }

    /// Simulate an out-of-band worker crash.
    pub fn kill_worker(&self, port: u16) {
        if let Some(worker) = self.inner.lock().workers.get_mut(&port) {
            worker.healthy = false;
        }
    }

    pub fn spawn_count(&self) -> usize {
        self.inner.lock().spawn_count
    }

    pub fn stop_count(&self) -> usize {
        self.inner.lock().stop_count
    }

    pub fn forwards(&self) -> Vec<ForwardCall> {
        self.inner.lock().forwards.clone()
    }

    /// Forwarded `tools/call` names with their target ports.
    pub fn forwarded_tool_calls(&self) -> Vec<(u16, String)> {
        self.inner
            .lock()
            .forwards
            .iter()
            .filter(|call| call.request.method == "tools/call")
            .map(|call| {
                let name = call.request.params.as_ref().and_then(|p| p["name"].as_str()).unwrap_or("").to_string();
                (call.port, name)
            })
            .collect()
    }

    pub fn recorded_binding(&self, port: u16) -> Option<(PathBuf, String)> {
        let state = self.inner.lock();
        state
            .workers
            .get(&port)
            .map(|w| (w.binary_path.clone(), w.worker_session_id.clone()))
    }

    fn next_session_id(state: &mut FakeState) -> String {
        if let Some(id) = state.scripted_session_ids.pop_front() {
            return id;
        }
        state.generated += 1;
        format!("sess-{}", state.generated)
    }
}

#[async_trait]
impl WorkerBackend for FakeBackend {
    fn active_ports(&self) -> Vec<u16> {
        self.inner.lock().workers.keys().copied().collect()
    }

    fn worker_count(&self) -> usize {
        self.inner.lock().workers.len()
    }

    fn default_port(&self) -> Option<u16> {
        self.inner.lock().default_port
    }

    fn is_healthy(&self, port: u16) -> bool {
        self.inner.lock().workers.get(&port).is_some_and(|w| w.healthy)
    }

    async fn start_worker(&self, binary_path: Option<&Path>) -> Result<u16, PoolError> {
        let mut state = self.inner.lock();
        if let Some(message) = state.spawn_error.take() {
            return Err(PoolError::StartupFailed(message));
        }
        state.spawn_count += 1;
        let port = match state.available_ports.iter().next().copied() {
            Some(port) => {
                state.available_ports.remove(&port);
                port
            }
            None => {
                let port = state.next_port;
                state.next_port += 1;
                port
            }
        };
        state.workers.insert(
            port,
            FakeWorker {
                healthy: true,
                binary_path: binary_path.map(Path::to_path_buf).unwrap_or_default(),
                worker_session_id: String::new(),
            },
        );
        Ok(port)
    }

    async fn stop_worker(&self, port: u16) -> bool {
        let mut state = self.inner.lock();
        if state.workers.remove(&port).is_none() {
            return false;
        }
        state.stop_count += 1;
        state.available_ports.insert(port);
        if state.default_port == Some(port) {
            state.default_port = None;
        }
        true
    }

    async fn forward(
        &self,
        port: u16,
        request: &JsonRpcRequest,
        _timeout: Option<Duration>,
    ) -> Result<JsonRpcResponse, PoolError> {
        let mut state = self.inner.lock();
        if !state.workers.get(&port).is_some_and(|w| w.healthy) {
            return Err(PoolError::Unhealthy(port));
        }
        state.forwards.push(ForwardCall { port, request: request.clone() });

        let id = request.response_id();
        match request.method.as_str() {
            "tools/list" => {
                Ok(JsonRpcResponse::result(id, json!({"tools": state.tools.clone()})))
            }
            "tools/call" => {
                let name = request.params.as_ref().and_then(|p| p["name"].as_str()).unwrap_or("");
                match name {
                    "idalib_open" => {
                        if let Some(message) = state.open_error.take() {
                            let result = json!({"success": false, "error": message});
                            return Ok(JsonRpcResponse::result(
                                id,
                                json!({
                                    "content": [{"type": "text", "text": result.to_string()}],
                                    "isError": false,
                                }),
                            ));
                        }
                        let session_id = Self::next_session_id(&mut state);
                        // Workers wrap their results in MCP text content
                        let result = json!({
                            "success": true,
                            "session": {"session_id": session_id},
                        });
                        Ok(JsonRpcResponse::result(
                            id,
                            json!({
                                "content": [{"type": "text", "text": result.to_string()}],
                                "isError": false,
                            }),
                        ))
                    }
                    "idalib_close" => Ok(JsonRpcResponse::result(
                        id,
                        json!({
                            "content": [{"type": "text", "text": "{\"success\": true}"}],
                            "isError": false,
                        }),
                    )),
                    _ => Ok(JsonRpcResponse::result(
                        id,
                        json!({
                            "content": [{"type": "text", "text": "{}"}],
                            "structuredContent": {"tool": name, "port": port},
                            "isError": false,
                        }),
                    )),
                }
            }
            _ => Ok(JsonRpcResponse::result(id, json!({"method": request.method}))),
        }
    }

    fn record_binding(&self, port: u16, binary_path: &Path, worker_session_id: &str) {
        if let Some(worker) = self.inner.lock().workers.get_mut(&port) {
            worker.binary_path = binary_path.to_path_buf();
            worker.worker_session_id = worker_session_id.to_string();
        }
    }
}
