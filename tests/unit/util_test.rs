//! Tests for utility functions

use prometheus_session_pool::util::{init_tracing, now_ms, DEFAULT_LOG_FILTER};

#[test]
fn test_now_ms_is_monotonic_enough() {
    let a = now_ms();
    std::thread::sleep(std::time::Duration::from_millis(5));
    let b = now_ms();
    assert!(b >= a + 5);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!(filter = DEFAULT_LOG_FILTER, "tracing initialised");
}
