//! HTTP transport specs
//!
//! Verify the wire behavior of `POST /mcp` and `GET /sse`: JSON-RPC
//! envelopes over HTTP 200, 204 for notifications, parse-error envelopes
//! with null ids.

use crate::prelude::*;

#[tokio::test]
async fn initialize_over_http() {
    let proxy = Proxy::new(2);
    let (status, body) = proxy
        .rpc(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {"protocolVersion": "2024-11-05", "capabilities": {}},
        }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jsonrpc"], "2.0");
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(body["result"]["capabilities"]["tools"]["listChanged"], false);
}

#[tokio::test]
async fn malformed_json_answers_http_200_with_parse_error() {
    let proxy = Proxy::new(2);
    let (status, body) = proxy.post_raw("{this is not json").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], Value::Null);
    assert_eq!(body["error"]["code"], -32700);
}

#[tokio::test]
async fn valid_json_invalid_envelope_is_invalid_request() {
    let proxy = Proxy::new(2);
    // Valid JSON, but no method
    let (status, body) = proxy.post_raw(r#"{"jsonrpc": "2.0", "id": 1}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"]["code"], -32600);
}

#[tokio::test]
async fn notifications_answer_http_204_with_no_body() {
    let proxy = Proxy::new(2);
    let (status, body) = proxy
        .rpc(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let proxy = Proxy::new(2);
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/nope")
        .body(axum::body::Body::empty())
        .expect("build request");
    let response =
        tower::util::ServiceExt::oneshot(proxy.app.clone(), request).await.expect("request failed");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sse_endpoint_speaks_event_stream() {
    let proxy = Proxy::new(2);
    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/sse")
        .body(axum::body::Body::empty())
        .expect("build request");
    let response =
        tower::util::ServiceExt::oneshot(proxy.app.clone(), request).await.expect("request failed");

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    // Body is an endless keepalive stream, so only the head is asserted
    assert!(content_type.starts_with("text/event-stream"), "content-type: {content_type}");
}

#[tokio::test]
async fn forwarded_method_without_session_reports_no_active_session() {
    let proxy = Proxy::new(2);
    let (status, body) = proxy
        .rpc(json!({"jsonrpc": "2.0", "id": 5, "method": "resources/list"}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 5);
    assert_eq!(body["error"]["code"], -32001);
}

#[tokio::test]
async fn tools_list_rewrites_worker_tools() {
    let proxy = Proxy::new(2);
    proxy.backend.set_worker_tools(vec![
        json!({"name": "idalib_list"}),
        json!({"name": "disassemble", "inputSchema": {"type": "object", "properties": {}}}),
    ]);
    let _ = proxy.backend.clone().with_default_worker();

    let (status, body) = proxy
        .rpc(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let tools = body["result"]["tools"].as_array().expect("no tools");
    let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    // Five session tools first, the worker's colliding idalib_list dropped,
    // the analysis tool kept with an injected session property
    assert_eq!(
        names,
        vec![
            "idalib_open",
            "idalib_close",
            "idalib_switch",
            "idalib_list",
            "idalib_current",
            "disassemble",
        ],
    );
    let disassemble = tools.iter().find(|t| t["name"] == "disassemble").expect("missing tool");
    assert!(disassemble["inputSchema"]["properties"]["session"].is_object());
}
