//! Session lifecycle specs
//!
//! The full multi-binary story over the HTTP surface: open, list, switch,
//! close, LRU eviction at capacity, idle-worker reuse, and crash masking.

use crate::prelude::*;

#[tokio::test]
async fn multiplexes_binaries_over_a_bounded_pool() {
    let proxy = Proxy::new(2);
    proxy.backend.script_session_ids(&["A", "B", "C", "D"]);

    // 1. First binary gets a fresh worker
    let first = proxy.open("test1").await;
    assert_eq!(first, "test1-A");
    let list = proxy.call("idalib_list", json!({})).await;
    assert_eq!(list["structuredContent"]["count"], 1);

    // 2. Second binary grows the pool to the cap
    let second = proxy.open("test2").await;
    assert_eq!(second, "test2-B");
    assert_eq!(proxy.backend.worker_count(), 2);

    // 3. Third binary evicts the LRU session; the pool does not grow
    let third = proxy.open("test3").await;
    assert_eq!(third, "test3-C");
    assert_eq!(proxy.session_ids().await, vec!["test2-B", "test3-C"]);
    assert_eq!(proxy.backend.worker_count(), 2);
    assert_eq!(proxy.backend.spawn_count(), 2);

    // 4. Switch then close: one bound worker, one idle
    let result = proxy.call("idalib_switch", json!({"session_id": "test2-B"})).await;
    assert_eq!(result["isError"], false);
    let result = proxy.call("idalib_close", json!({"session_id": "test3-C"})).await;
    assert_eq!(result["structuredContent"]["success"], true);

    let list = proxy.call("idalib_list", json!({})).await;
    assert_eq!(list["structuredContent"]["count"], 1);
    assert_eq!(list["structuredContent"]["current_session_id"], "test2-B");
    assert_eq!(proxy.backend.worker_count(), 2);

    // 5. Reopening the evicted binary reuses the idle worker under a new
    // session id; no eviction, no spawn
    let fourth = proxy.open("test1").await;
    assert_eq!(fourth, "test1-D");
    assert_eq!(proxy.session_ids().await, vec!["test1-D", "test2-B"]);
    assert_eq!(proxy.backend.spawn_count(), 2);
}

#[tokio::test]
async fn analysis_calls_follow_the_session_argument() {
    let proxy = Proxy::new(2);
    proxy.backend.script_session_ids(&["A", "B"]);
    let first = proxy.open("test1").await;
    proxy.open("test2").await;

    let result = proxy
        .call("decompile_function", json!({"address": "0x401000", "session": first}))
        .await;
    assert_eq!(result["isError"], false);

    // The forward landed on test1's worker, without the session argument
    let calls = proxy.backend.forwarded_tool_calls();
    let (port, name) = calls.last().expect("nothing forwarded");
    assert_eq!(name, "decompile_function");
    let (bound, _) = proxy.backend.recorded_binding(*port).expect("no binding");
    assert!(bound.ends_with("test1"), "forwarded to wrong worker: {bound:?}");
}

#[tokio::test]
async fn crashed_worker_is_masked_and_session_removed() {
    let proxy = Proxy::new(2);
    proxy.backend.script_session_ids(&["A", "B"]);
    let first = proxy.open("test1").await;
    proxy.open("test2").await;

    // 6. Kill test1's worker out-of-band; the next analysis call against it
    // is masked as a tool error and the session disappears
    let calls = proxy.backend.forwarded_tool_calls();
    let port = calls.first().expect("no open forwarded").0;
    proxy.backend.kill_worker(port);

    let result = proxy
        .call("decompile_function", json!({"session": first}))
        .await;
    assert_eq!(result["isError"], true);
    let message = result["structuredContent"]["error"].as_str().expect("no error");
    assert!(message.contains("no longer available"), "message: {message}");

    assert_eq!(proxy.session_ids().await, vec!["test2-B"]);
}

#[tokio::test]
async fn open_reports_missing_binaries_as_tool_errors() {
    let proxy = Proxy::new(2);
    let result = proxy
        .call("idalib_open", json!({"input_path": "/no/such/binary"}))
        .await;
    assert_eq!(result["isError"], true);
    let message = result["structuredContent"]["error"].as_str().expect("no error");
    assert!(message.contains("Binary file not found"), "message: {message}");
}

#[tokio::test]
async fn current_follows_switches() {
    let proxy = Proxy::new(2);
    proxy.backend.script_session_ids(&["A", "B"]);
    let first = proxy.open("test1").await;
    proxy.open("test2").await;

    let result = proxy.call("idalib_current", json!({})).await;
    assert_eq!(result["structuredContent"]["session_id"], "test2-B");

    proxy.call("idalib_switch", json!({"session_id": first.clone()})).await;
    let result = proxy.call("idalib_current", json!({})).await;
    assert_eq!(result["structuredContent"]["session_id"], first);
}
