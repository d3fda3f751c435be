//! Tests for error types

use std::time::Duration;

use prometheus_session_pool::core::{LaunchError, PoolError, QueueError};

#[test]
fn test_pool_exhausted_error() {
    assert_eq!(PoolError::PoolExhausted.to_string(), "no pre-warmed session available");
}

#[test]
fn test_launch_failure_wraps_source() {
    let err = PoolError::from(LaunchError::Spawn("no such file".into()));
    assert_eq!(err.to_string(), "session launch failed: spawn failed: no such file");
}

#[test]
fn test_io_error_converts_to_launch_error() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    let err: LaunchError = io.into();
    assert!(matches!(err, LaunchError::Io(_)));
    assert_eq!(err.to_string(), "io error: pipe closed");
}

#[test]
fn test_backpressure_is_retryable() {
    let err = QueueError::Backpressure { pending: 10, max: 10 };
    assert!(err.is_retryable());
    assert_eq!(err.to_string(), "queue full: 10 pending (max 10)");
}

#[test]
fn test_timeout_is_not_retryable() {
    let err = QueueError::TaskTimeout(Duration::from_millis(50));
    assert!(!err.is_retryable());
    assert_eq!(err.to_string(), "task timed out after 50ms");
}
