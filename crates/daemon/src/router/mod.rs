// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request router: translates the external JSON-RPC surface into session
//! registry calls and worker forwards.
//!
//! Session tools (`idalib_open`, `idalib_close`, `idalib_switch`,
//! `idalib_list`, `idalib_current`) are handled by the proxy itself.
//! Analysis tools are forwarded to the worker bound to the target session,
//! selected by the optional `session` argument or the current session.

mod schemas;

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use idaproxy_core::{Clock, SystemClock};

use crate::pool::WorkerBackend;
use crate::protocol::{
    tool_error, tool_result, JsonRpcRequest, JsonRpcResponse, FORWARD_FAILED, INTERNAL_ERROR,
    NO_ACTIVE_SESSION,
};
use crate::registry::{RegistryError, SessionRegistry};

pub use schemas::{is_session_tool, session_tool_schemas, SESSION_TOOLS};

const NO_SESSION_HINT: &str = "No active session. Use idalib_open() to open a binary first.";

/// Routes MCP requests to the registry or to worker processes.
pub struct Router<C: Clock = SystemClock> {
    registry: Arc<SessionRegistry<C>>,
    backend: Arc<dyn WorkerBackend>,
    /// Tool list captured from the default worker at startup, used when no
    /// worker can be reached for `tools/list`
    cached_tools: Mutex<Vec<Value>>,
    next_forward_id: AtomicI64,
}

impl<C: Clock> Router<C> {
    pub fn new(registry: Arc<SessionRegistry<C>>, backend: Arc<dyn WorkerBackend>) -> Self {
        Self { registry, backend, cached_tools: Mutex::new(Vec::new()), next_forward_id: AtomicI64::new(1) }
    }

    /// Refresh the cached tool list from the default worker. Called once
    /// after the default worker is up.
    pub async fn refresh_tools(&self) {
        let port = match self.backend.default_port() {
            Some(port) => port,
            None => {
                warn!("no default worker available for tools refresh");
                return;
            }
        };
        let request = JsonRpcRequest::new(1, "tools/list", json!({}));
        match self.backend.forward(port, &request, None).await {
            Ok(response) => {
                if let Some(tools) = result_tools(&response) {
                    let mut cached = self.cached_tools.lock();
                    *cached = tools;
                    info!(count = cached.len(), "cached tools from default worker");
                }
            }
            Err(e) => warn!(error = %e, "failed to refresh tools"),
        }
    }

    /// Route one JSON-RPC request. Returns `None` for notifications, which
    /// receive no response.
    pub async fn route(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(&request)),
            "tools/list" => Some(self.handle_tools_list(&request).await),
            "tools/call" => Some(self.handle_tools_call(&request).await),
            method if method.starts_with("notifications/") => None,
            _ => Some(self.forward_to_current(&request).await),
        }
    }

    fn handle_initialize(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        JsonRpcResponse::result(
            request.response_id(),
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {"listChanged": false},
                },
                "serverInfo": {
                    "name": "idaproxy",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        )
    }

    /// `tools/list`: the five session tools first, then every worker tool
    /// that does not collide with them, each with an injected optional
    /// `session` property.
    async fn handle_tools_list(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let worker_tools = self.worker_tools().await;

        let mut tools = session_tool_schemas();
        for tool in worker_tools {
            let name = tool.get("name").and_then(Value::as_str).unwrap_or("");
            // The worker ships its own session tools; the proxy overrides them
            if is_session_tool(name) {
                continue;
            }
            let mut tool = tool.clone();
            inject_session_property(&mut tool);
            tools.push(tool);
        }

        JsonRpcResponse::result(request.response_id(), json!({"tools": tools}))
    }

    /// Fetch the tool list from the current session's worker, falling back
    /// to the default worker, falling back to the startup cache.
    async fn worker_tools(&self) -> Vec<Value> {
        let port = self
            .registry
            .current_session()
            .map(|session| session.worker_port)
            .or_else(|| self.backend.default_port());

        if let Some(port) = port {
            let request = JsonRpcRequest::new(1, "tools/list", json!({}));
            match self.backend.forward(port, &request, None).await {
                Ok(response) => return result_tools(&response).unwrap_or_default(),
                Err(e) => {
                    warn!(port, error = %e, "failed to get tools from worker, using cached list");
                }
            }
        }
        self.cached_tools.lock().clone()
    }

    async fn handle_tools_call(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.response_id();
        let params = request.params.clone().unwrap_or_else(|| json!({}));
        let name = params.get("name").and_then(Value::as_str).unwrap_or("").to_string();
        let arguments =
            params.get("arguments").and_then(Value::as_object).cloned().unwrap_or_default();

        if is_session_tool(&name) {
            self.handle_session_tool(id, &name, &arguments).await
        } else {
            self.handle_analysis_tool(id, &name, arguments).await
        }
    }

    async fn handle_session_tool(
        &self,
        id: Value,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> JsonRpcResponse {
        match name {
            "idalib_open" => self.handle_open(id, arguments).await,
            "idalib_close" => self.handle_close(id, arguments).await,
            "idalib_switch" => self.handle_switch(id, arguments),
            "idalib_list" => self.handle_list(id),
            "idalib_current" => self.handle_current(id),
            _ => tool_error(id, format!("Unknown tool: {}", name)),
        }
    }

    async fn handle_open(&self, id: Value, arguments: &Map<String, Value>) -> JsonRpcResponse {
        let input_path = match arguments.get("input_path").and_then(Value::as_str) {
            Some(path) if !path.is_empty() => path,
            _ => return tool_error(id, "input_path is required"),
        };
        let run_auto_analysis =
            arguments.get("run_auto_analysis").and_then(Value::as_bool).unwrap_or(true);

        match self.registry.open_session(Path::new(input_path), run_auto_analysis).await {
            Ok(session) => tool_result(
                id,
                &json!({
                    "success": true,
                    "session": session.view(),
                    "message": format!("Binary opened successfully: {}", session.binary_name),
                }),
            ),
            Err(e @ RegistryError::NoCapacity) => {
                JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Internal error: {}", e))
            }
            Err(e) => tool_error(id, e.to_string()),
        }
    }

    async fn handle_close(&self, id: Value, arguments: &Map<String, Value>) -> JsonRpcResponse {
        let session_id = match arguments.get("session_id").and_then(Value::as_str) {
            Some(session_id) if !session_id.is_empty() => session_id,
            _ => return tool_error(id, "session_id is required"),
        };

        let result = if self.registry.close_session(session_id, false).await {
            json!({"success": true, "message": format!("Session closed: {}", session_id)})
        } else {
            json!({"success": false, "error": format!("Session not found: {}", session_id)})
        };
        tool_result(id, &result)
    }

    fn handle_switch(&self, id: Value, arguments: &Map<String, Value>) -> JsonRpcResponse {
        let session_id = match arguments.get("session_id").and_then(Value::as_str) {
            Some(session_id) if !session_id.is_empty() => session_id,
            _ => return tool_error(id, "session_id is required"),
        };

        match self.registry.switch_session(session_id) {
            Ok(session) => tool_result(
                id,
                &json!({
                    "success": true,
                    "session": session.view(),
                    "message": format!("Switched to session: {}", session_id),
                }),
            ),
            Err(e) => tool_error(id, e.to_string()),
        }
    }

    fn handle_list(&self, id: Value) -> JsonRpcResponse {
        let sessions = self.registry.list_sessions();
        let current_session_id = self
            .registry
            .current_session()
            .map(|session| Value::String(session.session_id))
            .unwrap_or(Value::Null);

        tool_result(
            id,
            &json!({
                "count": sessions.len(),
                "sessions": sessions,
                "current_session_id": current_session_id,
            }),
        )
    }

    fn handle_current(&self, id: Value) -> JsonRpcResponse {
        match self.registry.current_session() {
            Some(session) => tool_result(id, &serde_json::to_value(session.view()).unwrap_or(Value::Null)),
            None => tool_error(id, NO_SESSION_HINT),
        }
    }

    /// Forward an analysis tool call to the target session's worker,
    /// masking worker crashes as tool errors.
    async fn handle_analysis_tool(
        &self,
        id: Value,
        name: &str,
        mut arguments: Map<String, Value>,
    ) -> JsonRpcResponse {
        // The `session` argument targets the proxy, not the worker
        let session_arg = arguments
            .remove("session")
            .and_then(|value| value.as_str().map(str::to_string));

        let session = match session_arg {
            Some(session_id) => match self.registry.get_session(&session_id) {
                Some(session) => session,
                None => {
                    return tool_error(
                        id,
                        format!(
                            "Session not found: {}. Use idalib_open() to create a session first.",
                            session_id
                        ),
                    )
                }
            },
            None => match self.registry.current_session() {
                Some(session) => session,
                None => return tool_error(id, NO_SESSION_HINT),
            },
        };

        self.registry.touch_session(&session.session_id);

        if !self.backend.is_healthy(session.worker_port) {
            // Worker crashed: drop the session so the next open allocates a
            // fresh worker
            self.registry.close_session(&session.session_id, false).await;
            return tool_error(
                id,
                format!("Session {} is no longer available (process crashed)", session.session_id),
            );
        }

        let forward_id = self.next_forward_id.fetch_add(1, Ordering::Relaxed);
        let forward = JsonRpcRequest::new(
            forward_id,
            "tools/call",
            json!({"name": name, "arguments": arguments}),
        );
        match self.backend.forward(session.worker_port, &forward, None).await {
            Ok(mut response) => {
                // Restore the outer envelope id
                response.id = id;
                response
            }
            Err(e) => tool_error(id, e.to_string()),
        }
    }

    /// Forward any other method to the current session's worker unchanged.
    async fn forward_to_current(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.response_id();
        let session = match self.registry.current_session() {
            Some(session) => session,
            None => return JsonRpcResponse::error(id, NO_ACTIVE_SESSION, NO_SESSION_HINT),
        };

        match self.backend.forward(session.worker_port, request, None).await {
            Ok(response) => response,
            Err(e) => JsonRpcResponse::error(id, FORWARD_FAILED, e.to_string()),
        }
    }
}

/// Pull the `tools` array out of a `tools/list` response.
fn result_tools(response: &JsonRpcResponse) -> Option<Vec<Value>> {
    response.result.as_ref()?.get("tools")?.as_array().cloned()
}

/// Add the optional `session` input property to a worker tool schema.
fn inject_session_property(tool: &mut Value) {
    let obj = match tool.as_object_mut() {
        Some(obj) => obj,
        None => return,
    };
    let schema = obj.entry("inputSchema").or_insert_with(|| json!({"type": "object"}));
    let schema_obj = match schema.as_object_mut() {
        Some(schema_obj) => schema_obj,
        None => return,
    };
    let properties = schema_obj.entry("properties").or_insert_with(|| json!({}));
    if let Some(properties) = properties.as_object_mut() {
        properties.insert(
            "session".to_string(),
            json!({
                "type": "string",
                "description": "Session ID to use (optional, uses current session if not specified)",
            }),
        );
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
