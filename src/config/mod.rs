//! Configuration models for the session pool, queue, cache, and monitor.

pub mod pool;

pub use pool::{CacheConfig, MonitorConfig, PoolConfig, QueueConfig, ServiceConfig};
