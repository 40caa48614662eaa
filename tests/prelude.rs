//! Shared fixtures for specs

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use http_body_util::BodyExt;
use tower::util::ServiceExt;

use idaproxy_core::SystemClock;
use idaproxy_daemon::{listener, Router, SessionRegistry};

pub use axum::http::StatusCode;
pub use idaproxy_daemon::{FakeBackend, WorkerBackend};
pub use serde_json::{json, Value};

/// A proxy wired to a fake worker backend, exercised over its HTTP app.
pub struct Proxy {
    dir: tempfile::TempDir,
    pub backend: FakeBackend,
    pub app: axum::Router,
}

impl Proxy {
    pub fn new(max_processes: usize) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let backend = FakeBackend::new(8745);
        let registry = Arc::new(SessionRegistry::new(
            max_processes,
            Arc::new(backend.clone()) as Arc<dyn WorkerBackend>,
            SystemClock,
        ));
        let router = Arc::new(Router::new(registry, Arc::new(backend.clone())));
        let app = listener::app(router);
        Self { dir, backend, app }
    }

    /// Create a binary file under the fixture directory.
    pub fn binary(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, b"\x7fELF").expect("write binary");
        path
    }

    /// POST a raw body to `/mcp`, returning status and parsed JSON body.
    pub async fn post_raw(&self, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("build request");
        let response = self.app.clone().oneshot(request).await.expect("request failed");
        let status = response.status();
        let bytes = response.into_body().collect().await.expect("read body").to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response is not JSON")
        };
        (status, value)
    }

    /// POST a JSON-RPC envelope to `/mcp`.
    pub async fn rpc(&self, envelope: Value) -> (StatusCode, Value) {
        self.post_raw(&envelope.to_string()).await
    }

    /// Call a tool and return the MCP result envelope.
    pub async fn call(&self, name: &str, arguments: Value) -> Value {
        let (status, body) = self
            .rpc(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/call",
                "params": {"name": name, "arguments": arguments},
            }))
            .await;
        assert_eq!(status, StatusCode::OK);
        body["result"].clone()
    }

    /// Open a binary by name, asserting success, returning the session id.
    pub async fn open(&self, name: &str) -> String {
        let path = self.binary(name).display().to_string();
        let result = self.call("idalib_open", json!({"input_path": path})).await;
        assert_eq!(result["isError"], false, "open failed: {result}");
        result["structuredContent"]["session"]["session_id"]
            .as_str()
            .expect("missing session id")
            .to_string()
    }

    /// Snapshot of open session ids, sorted.
    pub async fn session_ids(&self) -> Vec<String> {
        let result = self.call("idalib_list", json!({})).await;
        let mut ids: Vec<String> = result["structuredContent"]["sessions"]
            .as_array()
            .expect("no sessions array")
            .iter()
            .filter_map(|s| s["session_id"].as_str().map(str::to_string))
            .collect();
        ids.sort();
        ids
    }
}
