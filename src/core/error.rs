//! Error types for pool, queue, and launcher operations.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a session launcher or an individual agent session.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The external process could not be started.
    #[error("spawn failed: {0}")]
    Spawn(String),
    /// I/O failure talking to the process.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The session's output stream closed before a response completed.
    #[error("session closed")]
    Closed,
    /// The launcher does not support the requested capability.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    /// The agent reported an error of its own.
    #[error("agent error: {0}")]
    Remote(String),
}

/// Errors produced by the session pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No READY session is available; callers fall back to an ad-hoc session.
    #[error("no pre-warmed session available")]
    PoolExhausted,
    /// Warm-up did not complete in time.
    #[error("warm-up timed out after {0:?}")]
    WarmupTimeout(Duration),
    /// The launcher failed to start a session.
    #[error("session launch failed: {0}")]
    LaunchFailed(#[from] LaunchError),
    /// The session id is not (or no longer) tracked by the pool.
    #[error("unknown session: {0}")]
    UnknownSession(String),
    /// The session exists but is not currently claimed.
    #[error("session {0} is not claimed")]
    NotClaimed(String),
    /// The pool has been shut down.
    #[error("session pool is shut down")]
    ShutDown,
}

/// Errors produced by the concurrency queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The pending queue is at its configured maximum; retry later.
    #[error("queue full: {pending} pending (max {max})")]
    Backpressure {
        /// Tasks pending when the submission was rejected.
        pending: usize,
        /// Configured maximum queue length.
        max: usize,
    },
    /// The task did not finish within its timeout.
    #[error("task timed out after {0:?}")]
    TaskTimeout(Duration),
    /// The queue was cleared or shut down before the task ran.
    #[error("queue shut down")]
    Shutdown,
    /// The task panicked or was aborted by the runtime.
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl QueueError {
    /// Whether the caller may retry the same submission later.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Backpressure { .. })
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
