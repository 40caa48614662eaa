// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proxy sessions: one binary loaded in one worker.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A binding of one binary file to one worker process.
///
/// Externally identified by a composed session id in the form
/// `<binary-name>-<worker-session-id>`, where the worker session id is the
/// opaque id the worker returned when the binary was loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxySession {
    pub session_id: String,
    /// Absolute, canonicalized path to the binary
    pub binary_path: PathBuf,
    /// Basename of `binary_path`
    pub binary_name: String,
    /// Port of the worker this session is bound to
    pub worker_port: u16,
    /// Opaque session id returned by the worker
    pub worker_session_id: String,
    pub created_at_ms: u64,
    pub last_accessed_ms: u64,
    /// At most one session is current at any time
    pub is_current: bool,
}

impl ProxySession {
    /// Create a session for a canonicalized binary path, composing the
    /// session id from the binary name and the worker session id.
    pub fn new(
        binary_path: PathBuf,
        worker_port: u16,
        worker_session_id: impl Into<String>,
        now_ms: u64,
    ) -> Self {
        let worker_session_id = worker_session_id.into();
        let binary_name = binary_basename(&binary_path);
        Self {
            session_id: format!("{}-{}", binary_name, worker_session_id),
            binary_path,
            binary_name,
            worker_port,
            worker_session_id,
            created_at_ms: now_ms,
            last_accessed_ms: now_ms,
            is_current: false,
        }
    }

    /// Update the last-accessed timestamp.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_accessed_ms = now_ms;
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            session_id: self.session_id.clone(),
            binary_path: self.binary_path.display().to_string(),
            binary_name: self.binary_name.clone(),
            created_at_ms: self.created_at_ms,
            last_accessed_ms: self.last_accessed_ms,
            is_current: self.is_current,
        }
    }
}

/// Wire-facing snapshot of a session, returned by the session tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: String,
    pub binary_path: String,
    pub binary_name: String,
    pub created_at_ms: u64,
    pub last_accessed_ms: u64,
    pub is_current: bool,
}

/// Basename of a binary path as a display string.
///
/// Falls back to the full display form for paths like `/` that have no
/// final component.
pub fn binary_basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
