//! Core pool, queue, and observability services.

use std::future::Future;
use std::pin::Pin;

pub mod cache;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod launcher;
pub mod monitor;
pub mod queue;
pub mod session_pool;

pub use cache::{with_cache, CacheEntry, CacheNamespaces, CacheStats, TtlCache};
pub use dispatcher::Dispatcher;
pub use error::{AppResult, LaunchError, PoolError, QueueError};
pub use events::{Event, EventBus, EventFilter, EventSubscriber};
pub use launcher::{AgentSession, SessionLauncher};
pub use monitor::{AggregatedMetric, Comparison, Metric, PerformanceMonitor, PerformanceReport};
pub use queue::{ConcurrencyQueue, QueueStats, QueuedTask, TaskOptions};
pub use session_pool::{ClaimedSession, SessionId, SessionPool, SessionStatus};

/// Boxed, sendable future used where closures must return a single type.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
