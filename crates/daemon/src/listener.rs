// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport shell: one JSON-RPC exchange per `POST /mcp` request,
//! plus a legacy `GET /sse` event-stream that carries no payload traffic.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use futures_util::stream::{self, Stream};
use futures_util::StreamExt;
use serde_json::Value;
use tracing::debug;

use idaproxy_core::Clock;

use crate::protocol::{JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR, INVALID_REQUEST, PARSE_ERROR};
use crate::router::Router;

/// Build the proxy's HTTP surface around a router.
pub fn app<C: Clock + 'static>(router: Arc<Router<C>>) -> axum::Router {
    axum::Router::new()
        .route("/mcp", post(handle_mcp::<C>))
        .route("/sse", get(handle_sse))
        .with_state(router)
}

async fn handle_mcp<C: Clock + 'static>(
    State(router): State<Arc<Router<C>>>,
    body: String,
) -> Response {
    // Parse failures still answer HTTP 200, carrying a JSON-RPC error
    // envelope with a null id.
    let value: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(e) => {
            return Json(JsonRpcResponse::error(
                Value::Null,
                PARSE_ERROR,
                format!("Parse error: {}", e),
            ))
            .into_response()
        }
    };
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            return Json(JsonRpcResponse::error(
                Value::Null,
                INVALID_REQUEST,
                format!("Invalid Request: {}", e),
            ))
            .into_response()
        }
    };

    debug!(method = %request.method, "handling request");
    // Routed on a detached task: a client disconnect drops this handler
    // but must not cancel an in-flight worker forward.
    let routed = tokio::spawn(async move { router.route(request).await }).await;
    match routed {
        Ok(Some(response)) => Json(response).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => Json(JsonRpcResponse::error(
            Value::Null,
            INTERNAL_ERROR,
            format!("Internal error: {}", e),
        ))
        .into_response(),
    }
}

/// Legacy SSE endpoint: an initial `connected` frame, then periodic
/// keepalive comments.
async fn handle_sse() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream =
        stream::once(async { Ok::<_, Infallible>(Event::default().event("connected").data("{}")) })
            .chain(stream::pending());
    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(30)).text("keepalive"))
}
