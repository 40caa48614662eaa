// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC 2.0 envelope types and the MCP tool-result wrappers.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received by the server.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;
/// Forwarding to a worker failed at the socket/HTTP layer.
pub const FORWARD_FAILED: i64 = -32000;
/// A forwarded method requires a current session and none exists.
pub const NO_ACTIVE_SESSION: i64 = -32001;

/// A JSON-RPC 2.0 request (or notification, when `id` is absent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params: Some(params),
        }
    }

    /// The request id as a response id: absent ids serialize as `null`.
    pub fn response_id(&self) -> Value {
        self.id.clone().unwrap_or(Value::Null)
    }
}

/// A JSON-RPC 2.0 response. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl JsonRpcResponse {
    pub fn result(id: Value, result: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION.to_string(), id, result: Some(result), error: None }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError { code, message: message.into() }),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// Wrap a tool result in the MCP envelope: serialized text content for
/// display plus `structuredContent` for schema validation.
pub fn tool_result(id: Value, result: &Value) -> JsonRpcResponse {
    let text = serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string());
    JsonRpcResponse::result(
        id,
        json!({
            "content": [{"type": "text", "text": text}],
            "structuredContent": result,
            "isError": false,
        }),
    )
}

/// Wrap a tool failure in the MCP envelope with `isError: true`.
pub fn tool_error(id: Value, error: impl Into<String>) -> JsonRpcResponse {
    let result = json!({"error": error.into()});
    let text = result.to_string();
    JsonRpcResponse::result(
        id,
        json!({
            "content": [{"type": "text", "text": text}],
            "structuredContent": result,
            "isError": true,
        }),
    )
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
