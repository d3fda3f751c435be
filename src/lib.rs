//! # Prometheus Session Pool
//!
//! Pre-warmed agent sessions with a rate-limited execution queue.
//!
//! Launching an agent CLI takes seconds. This crate keeps a small pool of
//! sessions already launched and idle, hands them out on demand, and routes
//! every prompt through a bounded, rate-limited FIFO queue so that bursts of
//! requests cannot overwhelm the agent backend.
//!
//! ## Key Features
//!
//! - **Session Pool**: keeps `pool_size` sessions warming, ready, or claimed;
//!   re-warms released sessions and evicts sessions past their max age
//! - **Concurrency Queue**: worker budget plus a fixed-window rate limiter,
//!   FIFO start order, per-task timeouts and backpressure
//! - **TTL Cache**: lazily expiring key/value store with a memoizing wrapper
//! - **Performance Monitor**: bounded timing buffer with p95/p99 aggregates
//! - **Event Bus**: correlation-tagged events with exact, category, and
//!   correlation filters
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_session_pool::builders::ServiceBuilder;
//! use prometheus_session_pool::config::ServiceConfig;
//! use prometheus_session_pool::infra::{ProcessLauncher, ProcessLauncherConfig};
//! use prometheus_session_pool::runtime::ExecuteCommandRequest;
//!
//! let launcher = ProcessLauncher::new(ProcessLauncherConfig::agent_cli("claude"));
//! let services = ServiceBuilder::new(ServiceConfig::from_env()?)
//!     .with_launcher(Arc::new(launcher))
//!     .build()?;
//! services.start();
//!
//! let response = services
//!     .dispatcher
//!     .execute_command(ExecuteCommandRequest::new("hello").with_caller("user-1"))
//!     .await;
//! services.shutdown().await;
//! ```
//!
//! For complete examples, see `tests/dispatcher_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Session pool, queue, cache, monitor, events, and dispatcher.
pub mod core;
/// Configuration models for the pool, queue, caches, and monitor.
pub mod config;
/// Builders to construct the service graph from configuration.
pub mod builders;
/// Launcher adapters (in-memory and child process).
pub mod infra;
/// API surface consumed by the request-handling layer.
pub mod runtime;
/// Shared utilities.
pub mod util;
