// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Schemas for the proxy-synthesized session tools.

use serde_json::{json, Value};

/// Tools handled by the proxy itself; part of the external contract.
pub const SESSION_TOOLS: [&str; 5] =
    ["idalib_open", "idalib_close", "idalib_switch", "idalib_list", "idalib_current"];

pub fn is_session_tool(name: &str) -> bool {
    SESSION_TOOLS.contains(&name)
}

/// Schemas for the five session tools, in the order they are advertised.
pub fn session_tool_schemas() -> Vec<Value> {
    vec![
        json!({
            "name": "idalib_open",
            "description": "Open a binary file for analysis. Creates a new session.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "input_path": {
                        "type": "string",
                        "description": "Path to the binary file to analyze",
                    },
                    "run_auto_analysis": {
                        "type": "boolean",
                        "description": "Run IDA auto-analysis (default: true)",
                        "default": true,
                    },
                },
                "required": ["input_path"],
            },
            "outputSchema": {
                "type": "object",
                "properties": {
                    "success": {"type": "boolean"},
                    "session": {
                        "type": "object",
                        "properties": {
                            "session_id": {"type": "string"},
                            "binary_path": {"type": "string"},
                            "binary_name": {"type": "string"},
                        },
                    },
                    "message": {"type": "string"},
                },
            },
        }),
        json!({
            "name": "idalib_close",
            "description": "Close a session and release its resources.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "session_id": {
                        "type": "string",
                        "description": "Session ID to close",
                    },
                },
                "required": ["session_id"],
            },
            "outputSchema": {
                "type": "object",
                "properties": {
                    "success": {"type": "boolean"},
                    "message": {"type": "string"},
                    "error": {"type": "string"},
                },
            },
        }),
        json!({
            "name": "idalib_switch",
            "description": "Switch to a different session.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "session_id": {
                        "type": "string",
                        "description": "Session ID to switch to",
                    },
                },
                "required": ["session_id"],
            },
            "outputSchema": {
                "type": "object",
                "properties": {
                    "success": {"type": "boolean"},
                    "session": {"type": "object"},
                    "message": {"type": "string"},
                },
            },
        }),
        json!({
            "name": "idalib_list",
            "description": "List all open sessions.",
            "inputSchema": {
                "type": "object",
                "properties": {},
            },
            "outputSchema": {
                "type": "object",
                "properties": {
                    "sessions": {
                        "type": "array",
                        "items": {"type": "object"},
                    },
                    "count": {"type": "integer"},
                    "current_session_id": {"type": ["string", "null"]},
                },
            },
        }),
        json!({
            "name": "idalib_current",
            "description": "Get the current active session.",
            "inputSchema": {
                "type": "object",
                "properties": {},
            },
            "outputSchema": {
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "binary_path": {"type": "string"},
                    "binary_name": {"type": "string"},
                },
            },
        }),
    ]
}
