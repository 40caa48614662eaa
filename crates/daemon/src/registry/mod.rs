// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session registry: `binary → worker` bindings with LRU eviction.
//!
//! Sessions are bound to pool workers. When a new binary arrives, the
//! registry prefers an idle worker, then pool growth, then evicting the
//! least-recently-used session so its worker can be reused.
//!
//! Lock ordering is registry state first, then pool; the pool never calls
//! back into the registry. No lock is held across a network round-trip:
//! state is mutated before/after forwards, and the async `open_lock`
//! serializes the whole open/evict critical section so a concurrent open
//! for the same binary lands on the fast path instead of creating a twin.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use idaproxy_core::{Clock, ProxySession, SessionView, SystemClock};

use crate::pool::{PoolError, WorkerBackend};
use crate::protocol::JsonRpcRequest;

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Binary file not found: {0}")]
    BinaryNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The worker accepted the request but refused the binary, or the
    /// open forward itself failed.
    #[error("{0}")]
    OpenFailed(String),

    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Unreachable under the invariants: the pool is at capacity yet no
    /// session exists to evict.
    #[error("no worker available and no session to evict")]
    NoCapacity,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<String, ProxySession>,
    binary_index: HashMap<PathBuf, String>,
    port_index: HashMap<u16, String>,
    /// Session ids in LRU order, front = oldest
    lru_order: VecDeque<String>,
    current_session_id: Option<String>,
}

enum Selection {
    /// A live worker with no bound session
    Reuse(u16),
    /// Pool below the cap: spawn a fresh worker
    Grow,
    /// Pool saturated: evict the LRU session and reuse its worker
    Evict,
}

/// Registry of proxy sessions, bounded by `max_processes`.
pub struct SessionRegistry<C: Clock = SystemClock> {
    max_processes: usize,
    backend: Arc<dyn WorkerBackend>,
    clock: C,
    state: Mutex<RegistryState>,
    /// Serializes open/evict; see module docs
    open_lock: tokio::sync::Mutex<()>,
}

impl<C: Clock> SessionRegistry<C> {
    pub fn new(max_processes: usize, backend: Arc<dyn WorkerBackend>, clock: C) -> Self {
        Self {
            max_processes,
            backend,
            clock,
            state: Mutex::new(RegistryState::default()),
            open_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Open a session for a binary, reusing the existing session when the
    /// binary is already loaded.
    pub async fn open_session(
        &self,
        binary_path: &Path,
        run_auto_analysis: bool,
    ) -> Result<ProxySession, RegistryError> {
        let _open = self.open_lock.lock().await;

        let canonical = std::fs::canonicalize(binary_path)
            .map_err(|_| RegistryError::BinaryNotFound(binary_path.display().to_string()))?;

        // Fast path: no worker work when the binary is already open.
        if let Some(session) = self.touch_existing(&canonical) {
            info!(session_id = %session.session_id, "returning existing session");
            return Ok(session);
        }

        let (port, started_new) = match self.plan_selection() {
            Selection::Reuse(port) => {
                info!(port, "reusing idle worker");
                (port, false)
            }
            Selection::Grow => {
                let port = self.backend.start_worker(None).await?;
                info!(port, "started new worker");
                (port, true)
            }
            Selection::Evict => {
                info!(max_processes = self.max_processes, "pool saturated, evicting LRU session");
                match self.evict_lru_for_reuse().await {
                    Some(port) => {
                        info!(port, "reusing evicted worker");
                        (port, false)
                    }
                    None => return Err(RegistryError::NoCapacity),
                }
            }
        };

        let request = JsonRpcRequest::new(
            1,
            "tools/call",
            json!({
                "name": "idalib_open",
                "arguments": {
                    "input_path": canonical.display().to_string(),
                    "run_auto_analysis": run_auto_analysis,
                },
            }),
        );

        let response = match self.backend.forward(port, &request, None).await {
            Ok(response) => response,
            Err(e) => {
                // A freshly-spawned worker is torn down again; a reused one
                // stays in the pool as idle.
                if started_new {
                    self.backend.stop_worker(port).await;
                }
                return Err(RegistryError::OpenFailed(format!("Failed to open binary: {}", e)));
            }
        };

        let worker_session_id = match parse_open_result(&response) {
            Ok(id) => id,
            Err(message) => {
                if started_new {
                    self.backend.stop_worker(port).await;
                }
                return Err(RegistryError::OpenFailed(message));
            }
        };

        let mut session =
            ProxySession::new(canonical.clone(), port, worker_session_id.clone(), self.clock.epoch_ms());
        self.backend.record_binding(port, &canonical, &worker_session_id);

        let session_id = session.session_id.clone();
        {
            let mut state = self.state.lock();
            state.sessions.insert(session_id.clone(), session.clone());
            state.binary_index.insert(canonical, session_id.clone());
            state.port_index.insert(port, session_id.clone());
            update_lru(&mut state, &session_id);
            set_current(&mut state, &session_id);
        }
        info!(session_id = %session_id, port, "created new session");

        session.is_current = true;
        Ok(session)
    }

    /// Close a session. The worker stays in the pool as idle unless
    /// `terminate_worker` is set. Returns false for unknown ids.
    pub async fn close_session(&self, session_id: &str, terminate_worker: bool) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let session = match state.sessions.remove(session_id) {
                Some(session) => session,
                None => {
                    warn!(session_id, "session not found");
                    return false;
                }
            };
            state.binary_index.remove(&session.binary_path);
            state.port_index.remove(&session.worker_port);
            state.lru_order.retain(|id| id != session_id);
            if state.current_session_id.as_deref() == Some(session_id) {
                promote_lru_tail(&mut state);
            }
            session
        };

        self.close_worker_session(removed.worker_port, &removed.worker_session_id).await;

        if terminate_worker {
            self.backend.stop_worker(removed.worker_port).await;
        }

        info!(session_id, "session closed");
        true
    }

    /// Make a session current and move it to the LRU tail.
    pub fn switch_session(&self, session_id: &str) -> Result<ProxySession, RegistryError> {
        let mut state = self.state.lock();
        if !state.sessions.contains_key(session_id) {
            return Err(RegistryError::SessionNotFound(session_id.to_string()));
        }
        let now_ms = self.clock.epoch_ms();
        if let Some(session) = state.sessions.get_mut(session_id) {
            session.touch(now_ms);
        }
        update_lru(&mut state, session_id);
        set_current(&mut state, session_id);
        info!(session_id, "switched to session");
        state
            .sessions
            .get(session_id)
            .cloned()
            .ok_or(RegistryError::SessionNotFound(session_id.to_string()))
    }

    /// Touch a session: bump `last_accessed` and move to the LRU tail.
    /// Returns false for unknown ids.
    pub fn touch_session(&self, session_id: &str) -> bool {
        let mut state = self.state.lock();
        let now_ms = self.clock.epoch_ms();
        match state.sessions.get_mut(session_id) {
            Some(session) => session.touch(now_ms),
            None => return false,
        }
        update_lru(&mut state, session_id);
        true
    }

    pub fn list_sessions(&self) -> Vec<SessionView> {
        self.state.lock().sessions.values().map(ProxySession::view).collect()
    }

    pub fn current_session(&self) -> Option<ProxySession> {
        let state = self.state.lock();
        let current = state.current_session_id.as_ref()?;
        state.sessions.get(current).cloned()
    }

    pub fn get_session(&self, session_id: &str) -> Option<ProxySession> {
        self.state.lock().sessions.get(session_id).cloned()
    }

    pub fn get_session_by_binary(&self, binary_path: &Path) -> Option<ProxySession> {
        let canonical = std::fs::canonicalize(binary_path).ok()?;
        let state = self.state.lock();
        let session_id = state.binary_index.get(&canonical)?;
        state.sessions.get(session_id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Close every session without terminating workers; used on shutdown
    /// before the pool's stop-all.
    pub async fn close_all(&self) {
        let session_ids: Vec<String> = {
            let state = self.state.lock();
            state.sessions.keys().cloned().collect()
        };
        for session_id in session_ids {
            self.close_session(&session_id, false).await;
        }
    }

    /// Fast path for `open_session`: touch and return the existing session
    /// for an already-open binary.
    fn touch_existing(&self, canonical: &Path) -> Option<ProxySession> {
        let mut state = self.state.lock();
        let session_id = state.binary_index.get(canonical)?.clone();
        let now_ms = self.clock.epoch_ms();
        if let Some(session) = state.sessions.get_mut(&session_id) {
            session.touch(now_ms);
        }
        update_lru(&mut state, &session_id);
        set_current(&mut state, &session_id);
        state.sessions.get(&session_id).cloned()
    }

    /// Three-tier worker selection: idle reuse, growth, eviction.
    fn plan_selection(&self) -> Selection {
        let state = self.state.lock();
        for port in self.backend.active_ports() {
            if !state.port_index.contains_key(&port) {
                return Selection::Reuse(port);
            }
        }
        if self.backend.worker_count() < self.max_processes {
            return Selection::Grow;
        }
        Selection::Evict
    }

    /// Evict the LRU session, keeping its worker for reuse. Returns the
    /// freed worker port.
    async fn evict_lru_for_reuse(&self) -> Option<u16> {
        let (victim_id, port, worker_session_id) = {
            let mut state = self.state.lock();
            let victim_id = state.lru_order.pop_front()?;
            let session = state.sessions.remove(&victim_id)?;
            state.binary_index.remove(&session.binary_path);
            state.port_index.remove(&session.worker_port);
            if state.current_session_id.as_deref() == Some(victim_id.as_str()) {
                promote_lru_tail(&mut state);
            }
            (victim_id, session.worker_port, session.worker_session_id)
        };

        info!(session_id = %victim_id, port, "evicted LRU session, worker available for reuse");
        self.close_worker_session(port, &worker_session_id).await;
        Some(port)
    }

    /// Best-effort `idalib_close` on the worker; failures only warn.
    async fn close_worker_session(&self, port: u16, worker_session_id: &str) {
        let request = JsonRpcRequest::new(
            1,
            "tools/call",
            json!({
                "name": "idalib_close",
                "arguments": {"session_id": worker_session_id},
            }),
        );
        if let Err(e) = self.backend.forward(port, &request, None).await {
            warn!(port, error = %e, "failed to close worker session");
        }
    }
}

/// Move a session id to the LRU tail (most recently used).
fn update_lru(state: &mut RegistryState, session_id: &str) {
    state.lru_order.retain(|id| id != session_id);
    state.lru_order.push_back(session_id.to_string());
}

/// Mark a session current, clearing the previous current flag.
fn set_current(state: &mut RegistryState, session_id: &str) {
    if let Some(previous) = state.current_session_id.take() {
        if let Some(session) = state.sessions.get_mut(&previous) {
            session.is_current = false;
        }
    }
    state.current_session_id = Some(session_id.to_string());
    if let Some(session) = state.sessions.get_mut(session_id) {
        session.is_current = true;
    }
}

/// After the current session goes away, the LRU tail (if any) becomes
/// current.
fn promote_lru_tail(state: &mut RegistryState) {
    state.current_session_id = state.lru_order.back().cloned();
    if let Some(current) = state.current_session_id.clone() {
        if let Some(session) = state.sessions.get_mut(&current) {
            session.is_current = true;
        }
    }
}

/// Extract the worker session id from an `idalib_open` response. Workers
/// wrap results in MCP text content; bare result objects are accepted too.
fn parse_open_result(response: &crate::protocol::JsonRpcResponse) -> Result<String, String> {
    if let Some(error) = &response.error {
        return Err(format!("idalib_open failed: {}", error.message));
    }
    let result = response.result.clone().unwrap_or(Value::Null);

    let data = match result
        .get("content")
        .and_then(|content| content.get(0))
        .and_then(|first| first.get("text"))
        .and_then(Value::as_str)
    {
        Some(text) => serde_json::from_str(text)
            .map_err(|e| format!("idalib_open returned malformed result: {}", e))?,
        None => result,
    };

    if !data.get("success").and_then(Value::as_bool).unwrap_or(false) {
        let error = data.get("error").and_then(Value::as_str).unwrap_or("Unknown error");
        return Err(format!("idalib_open failed: {}", error));
    }

    Ok(data
        .get("session")
        .and_then(|session| session.get("session_id"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string())
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
