//! Tests for configuration validation and loading

use std::collections::HashMap;
use std::time::Duration;

use prometheus_session_pool::config::{CacheConfig, PoolConfig, QueueConfig, ServiceConfig};

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults_are_valid() {
    let cfg = ServiceConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.pool.pool_size, 3);
    assert_eq!(cfg.pool.max_session_age(), Duration::from_secs(30 * 60));
    assert_eq!(cfg.pool.cleanup_interval(), Duration::from_secs(60));
    assert_eq!(cfg.pool.warmup_timeout(), Duration::from_secs(30));
    assert_eq!(cfg.queue.concurrency, 5);
    assert_eq!(cfg.queue.interval(), Duration::from_secs(1));
    assert_eq!(cfg.queue.interval_cap, 3);
    assert_eq!(cfg.queue.default_timeout(), Duration::from_secs(300));
    assert_eq!(cfg.cache.session_ttl_secs, 60);
    assert_eq!(cfg.cache.record_ttl_secs, 300);
    assert_eq!(cfg.cache.stats_ttl_secs, 30);
}

#[test]
fn test_pool_config_invalid_size() {
    let invalid = PoolConfig {
        pool_size: 0,
        ..PoolConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_queue_config_invalid_concurrency() {
    let invalid = QueueConfig {
        concurrency: 0,
        ..QueueConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_cache_config_invalid_ttl() {
    let invalid = CacheConfig {
        stats_ttl_secs: 0,
        ..CacheConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_service_config_names_failing_section() {
    let mut cfg = ServiceConfig::default();
    cfg.pool.warmup_timeout_ms = 0;
    let err = cfg.validate().unwrap_err();
    assert!(err.starts_with("pool invalid"), "{err}");
}

#[test]
fn test_launch_backoff_doubles_and_caps() {
    let cfg = PoolConfig {
        launch_backoff_ms: 100,
        cleanup_interval_ms: 1000,
        ..PoolConfig::default()
    };
    assert_eq!(cfg.launch_backoff(0), Duration::from_millis(100));
    assert_eq!(cfg.launch_backoff(1), Duration::from_millis(200));
    assert_eq!(cfg.launch_backoff(2), Duration::from_millis(400));
    assert_eq!(cfg.launch_backoff(10), Duration::from_millis(1000));
}

#[test]
fn test_from_json_str_fills_defaults() {
    let cfg = ServiceConfig::from_json_str(r#"{ "pool": { "pool_size": 5 }, "queue": { "concurrency": 2 } }"#)
        .expect("valid json config");
    assert_eq!(cfg.pool.pool_size, 5);
    assert_eq!(cfg.queue.concurrency, 2);
    assert_eq!(cfg.queue.interval_cap, 3);
    assert_eq!(cfg.cache, CacheConfig::default());
}

#[test]
fn test_from_json_str_rejects_invalid() {
    assert!(ServiceConfig::from_json_str(r#"{ "pool": { "pool_size": 0 } }"#).is_err());
    assert!(ServiceConfig::from_json_str("not json").is_err());
}

#[test]
fn test_from_lookup_overrides() {
    let cfg = ServiceConfig::from_lookup(lookup_from(&[
        ("PREWARM_POOL_SIZE", "4"),
        ("PREWARM_MAX_SESSION_AGE_MS", "60000"),
        ("QUEUE_CONCURRENCY", "8"),
        ("QUEUE_MAX_LENGTH", "100"),
        ("CACHE_STATS_TTL_SECS", "10"),
        ("MONITOR_MAX_METRICS", "500"),
    ]))
    .expect("valid overrides");

    assert_eq!(cfg.pool.pool_size, 4);
    assert_eq!(cfg.pool.max_session_age_ms, 60_000);
    assert_eq!(cfg.queue.concurrency, 8);
    assert_eq!(cfg.queue.max_queue_length, Some(100));
    assert_eq!(cfg.cache.stats_ttl_secs, 10);
    assert_eq!(cfg.monitor.max_metrics, 500);
    assert_eq!(cfg.pool.cleanup_interval_ms, 60_000);
}

#[test]
fn test_from_lookup_rejects_unparsable_value() {
    let err = ServiceConfig::from_lookup(lookup_from(&[("QUEUE_INTERVAL_MS", "soon")])).unwrap_err();
    assert!(err.contains("QUEUE_INTERVAL_MS"), "{err}");
}
