// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proxy configuration: defaults, JSON config file, validation.
//!
//! Configuration is a small fixed record. The config file enumerates the
//! recognized keys explicitly; CLI arguments override file values.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime configuration for the proxy server.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    /// Host address to bind to (and to reach workers on)
    pub host: String,
    /// Port for the proxy's own HTTP listener
    pub port: u16,
    /// Maximum number of concurrent worker processes
    pub max_processes: usize,
    /// First port handed to workers; the default worker lives here
    pub base_port: u16,
    /// Socket timeout for requests forwarded to workers
    pub request_timeout: Duration,
    /// Command tokens used to launch a worker, before `--host`/`--port`
    pub worker_command: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8744,
            max_processes: 2,
            base_port: 8745,
            request_timeout: Duration::from_secs(300),
            worker_command: vec!["uv".to_string(), "run".to_string(), "idalib-mcp".to_string()],
        }
    }
}

impl ProxyConfig {
    /// Overlay values from a parsed config file. Only keys present in the
    /// file are applied.
    pub fn apply_file(&mut self, file: &ConfigFile) {
        if let Some(host) = &file.host {
            self.host = host.clone();
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(max_processes) = file.max_processes {
            self.max_processes = max_processes;
        }
        if let Some(base_port) = file.base_port {
            self.base_port = base_port;
        }
        if let Some(secs) = file.request_timeout {
            self.request_timeout = Duration::from_secs(secs);
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_processes < 1 {
            return Err(ConfigError::Invalid("max_processes must be at least 1".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be between 1 and 65535".into()));
        }
        if self.base_port == 0 {
            return Err(ConfigError::Invalid("base_port must be between 1 and 65535".into()));
        }
        if self.request_timeout < Duration::from_secs(1) {
            return Err(ConfigError::Invalid("request_timeout must be at least 1 second".into()));
        }
        if self.worker_command.is_empty() {
            return Err(ConfigError::Invalid("worker_command must not be empty".into()));
        }
        Ok(())
    }
}

/// On-disk configuration file: a JSON object with all keys optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConfigFile {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_processes: Option<usize>,
    pub base_port: Option<u16>,
    /// Seconds
    pub request_timeout: Option<u64>,
}

impl ConfigFile {
    /// Load a config file from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read { path: path.display().to_string(), source: e })?;
        serde_json::from_str(&text)
            .map_err(|e| ConfigError::Parse { path: path.display().to_string(), source: e })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
