// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::pool::fake::FakeBackend;
use idaproxy_core::FakeClock;
use std::fs;
use std::path::PathBuf;

struct Fixture {
    dir: tempfile::TempDir,
    backend: FakeBackend,
    registry: Arc<SessionRegistry<FakeClock>>,
    router: Router<FakeClock>,
}

impl Fixture {
    fn new(max_processes: usize) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let backend = FakeBackend::new(8745);
        let registry = Arc::new(SessionRegistry::new(
            max_processes,
            Arc::new(backend.clone()) as Arc<dyn WorkerBackend>,
            FakeClock::new(),
        ));
        let router = Router::new(registry.clone(), Arc::new(backend.clone()));
        Self { dir, backend, registry, router }
    }

    fn binary(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, b"\x7fELF").expect("write binary");
        path
    }

    async fn open(&self, name: &str) -> String {
        let response = self
            .call_tool(
                "idalib_open",
                json!({"input_path": self.binary(name).display().to_string()}),
            )
            .await;
        let result = response.result.expect("open had no result");
        assert_eq!(result["isError"], false, "open failed: {result}");
        result["structuredContent"]["session"]["session_id"]
            .as_str()
            .expect("missing session id")
            .to_string()
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> JsonRpcResponse {
        let request = JsonRpcRequest::new(
            1,
            "tools/call",
            json!({"name": name, "arguments": arguments}),
        );
        self.router.route(request).await.expect("tool call had no response")
    }
}

fn structured(response: &JsonRpcResponse) -> &Value {
    &response.result.as_ref().expect("no result")["structuredContent"]
}

fn is_error(response: &JsonRpcResponse) -> bool {
    response.result.as_ref().expect("no result")["isError"] == json!(true)
}

#[tokio::test]
async fn initialize_reports_protocol_and_identity() {
    let fx = Fixture::new(2);
    let request = JsonRpcRequest::new(1, "initialize", json!({}));
    let response = fx.router.route(request).await.expect("no response");

    let result = response.result.expect("no result");
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
    assert_eq!(result["serverInfo"]["name"], "idaproxy");
}

#[tokio::test]
async fn notifications_are_consumed_without_response() {
    let fx = Fixture::new(2);
    let request: JsonRpcRequest = serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "method": "notifications/initialized",
    }))
    .unwrap();
    assert!(fx.router.route(request).await.is_none());
}

#[tokio::test]
async fn unknown_method_without_session_is_no_active_session_error() {
    let fx = Fixture::new(2);
    let request = JsonRpcRequest::new(9, "resources/list", json!({}));
    let response = fx.router.route(request).await.expect("no response");

    let error = response.error.expect("expected error");
    assert_eq!(error.code, NO_ACTIVE_SESSION);
    assert_eq!(response.id, json!(9));
}

#[tokio::test]
async fn unknown_method_forwards_to_current_worker_unchanged() {
    let fx = Fixture::new(2);
    fx.backend.script_session_ids(&["A"]);
    fx.open("test1").await;

    let request = JsonRpcRequest::new(9, "resources/list", json!({}));
    fx.router.route(request).await.expect("no response");

    let forwards = fx.backend.forwards();
    let last = forwards.last().expect("nothing forwarded");
    assert_eq!(last.request.method, "resources/list");
    // The envelope is forwarded as-is, original id included
    assert_eq!(last.request.id, Some(json!(9)));
}

#[tokio::test]
async fn tools_list_prepends_session_tools_and_drops_collisions() {
    let fx = Fixture::new(2);
    fx.backend.set_worker_tools(vec![
        json!({"name": "idalib_open", "inputSchema": {"type": "object", "properties": {}}}),
        json!({"name": "decompile_function", "inputSchema": {"type": "object", "properties": {"address": {"type": "string"}}}}),
    ]);
    let _ = fx.backend.clone().with_default_worker();

    let request = JsonRpcRequest::new(1, "tools/list", json!({}));
    let response = fx.router.route(request).await.expect("no response");
    let tools = response.result.expect("no result")["tools"].as_array().cloned().expect("no tools");

    let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    assert_eq!(
        names,
        vec![
            "idalib_open",
            "idalib_close",
            "idalib_switch",
            "idalib_list",
            "idalib_current",
            "decompile_function",
        ],
    );

    // The surviving worker tool gained the optional session property and
    // kept its own inputs
    let decompile = &tools[5];
    assert_eq!(decompile["inputSchema"]["properties"]["session"]["type"], "string");
    assert_eq!(decompile["inputSchema"]["properties"]["address"]["type"], "string");
    // The prepended idalib_open is the proxy's schema, not the worker's
    assert_eq!(tools[0]["inputSchema"]["required"], json!(["input_path"]));
}

#[tokio::test]
async fn tools_list_falls_back_to_cached_tools_when_worker_unreachable() {
    let fx = Fixture::new(2);
    fx.backend.set_worker_tools(vec![json!({"name": "decompile_function"})]);
    let backend = fx.backend.clone().with_default_worker();
    let default_port = backend.default_port().expect("default port");

    fx.router.refresh_tools().await;
    fx.backend.kill_worker(default_port);

    let request = JsonRpcRequest::new(1, "tools/list", json!({}));
    let response = fx.router.route(request).await.expect("no response");
    let tools = response.result.expect("no result")["tools"].as_array().cloned().expect("no tools");

    let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    assert!(names.contains(&"decompile_function"), "cached tool missing: {names:?}");
}

#[tokio::test]
async fn open_requires_input_path() {
    let fx = Fixture::new(2);
    let response = fx.call_tool("idalib_open", json!({})).await;
    assert!(is_error(&response));
    assert_eq!(structured(&response)["error"], "input_path is required");
}

#[tokio::test]
async fn open_returns_session_view_and_message() {
    let fx = Fixture::new(2);
    fx.backend.script_session_ids(&["A"]);

    let path = fx.binary("test1");
    let response = fx
        .call_tool("idalib_open", json!({"input_path": path.display().to_string()}))
        .await;

    assert!(!is_error(&response));
    let content = structured(&response);
    assert_eq!(content["success"], true);
    assert_eq!(content["message"], "Binary opened successfully: test1");
    assert_eq!(content["session"]["session_id"], "test1-A");
    assert_eq!(content["session"]["is_current"], true);
}

#[tokio::test]
async fn open_missing_binary_is_a_tool_error() {
    let fx = Fixture::new(2);
    let response = fx
        .call_tool("idalib_open", json!({"input_path": "/definitely/not/here"}))
        .await;
    assert!(is_error(&response));
    let message = structured(&response)["error"].as_str().expect("no error");
    assert!(message.contains("Binary file not found"), "message: {message}");
}

#[tokio::test]
async fn open_with_no_capacity_is_an_internal_error() {
    let fx = Fixture::new(0);
    let path = fx.binary("test1");
    let request = JsonRpcRequest::new(
        1,
        "tools/call",
        json!({"name": "idalib_open", "arguments": {"input_path": path.display().to_string()}}),
    );
    let response = fx.router.route(request).await.expect("no response");
    let error = response.error.expect("expected rpc error");
    assert_eq!(error.code, INTERNAL_ERROR);
}

#[tokio::test]
async fn close_reports_success_and_unknown_ids() {
    let fx = Fixture::new(2);
    fx.backend.script_session_ids(&["A"]);
    let session_id = fx.open("test1").await;

    let response = fx.call_tool("idalib_close", json!({"session_id": session_id})).await;
    assert!(!is_error(&response));
    assert_eq!(structured(&response)["success"], true);

    // Unknown ids are a success:false payload, not a tool error
    let response = fx.call_tool("idalib_close", json!({"session_id": "nope"})).await;
    assert!(!is_error(&response));
    assert_eq!(structured(&response)["success"], false);

    let response = fx.call_tool("idalib_close", json!({})).await;
    assert!(is_error(&response));
    assert_eq!(structured(&response)["error"], "session_id is required");
}

#[tokio::test]
async fn switch_targets_known_sessions_only() {
    let fx = Fixture::new(2);
    fx.backend.script_session_ids(&["A", "B"]);
    let first = fx.open("test1").await;
    fx.open("test2").await;

    let response = fx.call_tool("idalib_switch", json!({"session_id": first})).await;
    assert!(!is_error(&response));
    assert_eq!(structured(&response)["session"]["session_id"], first);
    assert_eq!(fx.registry.current_session().map(|s| s.session_id), Some(first));

    let response = fx.call_tool("idalib_switch", json!({"session_id": "nope"})).await;
    assert!(is_error(&response));
}

#[tokio::test]
async fn list_reports_count_and_current() {
    let fx = Fixture::new(2);
    fx.backend.script_session_ids(&["A", "B"]);
    fx.open("test1").await;
    let second = fx.open("test2").await;

    let response = fx.call_tool("idalib_list", json!({})).await;
    let content = structured(&response);
    assert_eq!(content["count"], 2);
    assert_eq!(content["current_session_id"], second);
    assert_eq!(content["sessions"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn current_reports_view_or_error() {
    let fx = Fixture::new(2);

    let response = fx.call_tool("idalib_current", json!({})).await;
    assert!(is_error(&response));

    fx.backend.script_session_ids(&["A"]);
    let session_id = fx.open("test1").await;
    let response = fx.call_tool("idalib_current", json!({})).await;
    assert!(!is_error(&response));
    assert_eq!(structured(&response)["session_id"], session_id);
}

#[tokio::test]
async fn analysis_call_targets_explicit_session_and_strips_argument() {
    let fx = Fixture::new(2);
    fx.backend.script_session_ids(&["A", "B"]);
    let first = fx.open("test1").await;
    fx.open("test2").await;

    let first_port = fx.registry.get_session(&first).expect("session gone").worker_port;

    let response = fx
        .call_tool("decompile_function", json!({"address": "0x401000", "session": first}))
        .await;
    assert!(!is_error(&response));

    let forwards = fx.backend.forwards();
    let last = forwards.last().expect("nothing forwarded");
    assert_eq!(last.port, first_port);
    let params = last.request.params.as_ref().expect("no params");
    assert_eq!(params["name"], "decompile_function");
    assert_eq!(params["arguments"]["address"], "0x401000");
    // The proxy-only `session` argument is not forwarded to the worker
    assert!(params["arguments"].get("session").is_none());
}

#[tokio::test]
async fn analysis_call_defaults_to_current_session() {
    let fx = Fixture::new(2);
    fx.backend.script_session_ids(&["A", "B"]);
    fx.open("test1").await;
    let second = fx.open("test2").await;
    let second_port = fx.registry.get_session(&second).expect("session gone").worker_port;

    fx.call_tool("decompile_function", json!({"address": "0x1"})).await;

    let forwards = fx.backend.forwards();
    assert_eq!(forwards.last().expect("nothing forwarded").port, second_port);
}

#[tokio::test]
async fn analysis_call_restores_outer_request_id() {
    let fx = Fixture::new(2);
    fx.backend.script_session_ids(&["A"]);
    fx.open("test1").await;

    let request = JsonRpcRequest::new(
        "outer-42",
        "tools/call",
        json!({"name": "decompile_function", "arguments": {}}),
    );
    let response = fx.router.route(request).await.expect("no response");
    assert_eq!(response.id, json!("outer-42"));

    // The worker saw a rewritten local id, not the outer one
    let forwards = fx.backend.forwards();
    let inner_id = forwards.last().expect("nothing forwarded").request.id.clone();
    assert_ne!(inner_id, Some(json!("outer-42")));
}

#[tokio::test]
async fn analysis_call_with_unknown_session_is_a_tool_error() {
    let fx = Fixture::new(2);
    let response = fx
        .call_tool("decompile_function", json!({"session": "ghost"}))
        .await;
    assert!(is_error(&response));
    let message = structured(&response)["error"].as_str().expect("no error");
    assert!(message.starts_with("Session not found: ghost"), "message: {message}");
}

#[tokio::test]
async fn analysis_call_without_any_session_is_a_tool_error() {
    let fx = Fixture::new(2);
    let response = fx.call_tool("decompile_function", json!({})).await;
    assert!(is_error(&response));
    assert_eq!(
        structured(&response)["error"],
        "No active session. Use idalib_open() to open a binary first."
    );
}

#[tokio::test]
async fn crashed_worker_masks_as_tool_error_and_unbinds_session() {
    let fx = Fixture::new(2);
    fx.backend.script_session_ids(&["A", "B"]);
    let session_id = fx.open("test1").await;
    let port = fx.registry.get_session(&session_id).expect("session gone").worker_port;

    fx.backend.kill_worker(port);

    let response = fx
        .call_tool("decompile_function", json!({"session": session_id}))
        .await;
    assert!(is_error(&response));
    let message = structured(&response)["error"].as_str().expect("no error");
    assert!(message.contains("no longer available"), "message: {message}");

    // The session is gone from the registry, and a different binary can
    // still be opened afterwards
    assert!(fx.registry.get_session(&session_id).is_none());
    let reopened = fx.open("test2").await;
    assert_eq!(reopened, "test2-B");
}

#[tokio::test]
async fn analysis_forward_touches_target_session_lru() {
    let fx = Fixture::new(2);
    fx.backend.script_session_ids(&["A", "B", "C"]);
    let first = fx.open("test1").await;
    fx.open("test2").await;

    // Analysis traffic on test1 protects it from the next eviction
    fx.call_tool("decompile_function", json!({"session": first})).await;
    fx.open("test3").await;

    let mut survivors: Vec<String> =
        fx.registry.list_sessions().into_iter().map(|s| s.session_id).collect();
    survivors.sort();
    assert_eq!(survivors, vec!["test1-A", "test3-C"]);
}
