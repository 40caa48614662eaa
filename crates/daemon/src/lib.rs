// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! idaproxy daemon library
//!
//! A multiplexing proxy in front of idalib-mcp analysis workers. One
//! HTTP/JSON-RPC surface, a bounded pool of worker processes, and LRU
//! session eviction when the pool is saturated.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod env;
pub mod lifecycle;
pub mod listener;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod router;

pub use lifecycle::{run, LifecycleError};
pub use pool::{PoolError, WorkerBackend, WorkerPool};
pub use protocol::{JsonRpcRequest, JsonRpcResponse, RpcError};
pub use registry::{RegistryError, SessionRegistry};
pub use router::Router;

#[cfg(any(test, feature = "test-support"))]
pub use pool::fake::FakeBackend;
