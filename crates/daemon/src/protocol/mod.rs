// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC 2.0 protocol for the MCP wire surface.
//!
//! One request/response envelope per HTTP exchange at `POST /mcp`.

mod envelope;

pub use envelope::{
    tool_error, tool_result, JsonRpcRequest, JsonRpcResponse, RpcError, FORWARD_FAILED,
    INTERNAL_ERROR, INVALID_REQUEST, JSONRPC_VERSION, METHOD_NOT_FOUND, NO_ACTIVE_SESSION,
    PARSE_ERROR,
};
