// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::time::Duration;

/// Maximum time to wait for a spawned worker to become ready
/// (default 60s, configurable via `IDAPROXY_STARTUP_TIMEOUT_SECS`).
pub fn startup_timeout() -> Duration {
    std::env::var("IDAPROXY_STARTUP_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(60))
}

/// Delay between readiness probe attempts
/// (default 500ms, configurable via `IDAPROXY_READY_POLL_MS`).
pub fn ready_poll_interval() -> Duration {
    std::env::var("IDAPROXY_READY_POLL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(500))
}

/// Socket timeout for a single readiness probe (default 2s).
pub fn probe_timeout() -> Duration {
    std::env::var("IDAPROXY_PROBE_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(2))
}

/// Override for the worker launch command. Whitespace-separated tokens,
/// e.g. `IDAPROXY_WORKER_CMD="uv run idalib-mcp"`.
pub fn worker_command_override() -> Option<Vec<String>> {
    let raw = std::env::var("IDAPROXY_WORKER_CMD").ok()?;
    let tokens: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
    if tokens.is_empty() {
        return None;
    }
    Some(tokens)
}
