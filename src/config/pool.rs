//! Pool, queue, cache, and monitor configuration structures.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Session pool configuration. All durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of sessions kept warming, ready, or claimed.
    pub pool_size: usize,
    /// Age after which a session is retired.
    pub max_session_age_ms: u64,
    /// Period of the eviction sweep and refill tick.
    pub cleanup_interval_ms: u64,
    /// Deadline for a launch or re-warm to reach READY.
    pub warmup_timeout_ms: u64,
    /// Consecutive launch failures tolerated before the pool reports degraded.
    pub max_launch_attempts: u32,
    /// Base delay for exponential launch backoff.
    pub launch_backoff_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 3,
            max_session_age_ms: 30 * 60 * 1000,
            cleanup_interval_ms: 60 * 1000,
            warmup_timeout_ms: 30 * 1000,
            max_launch_attempts: 3,
            launch_backoff_ms: 1000,
        }
    }
}

impl PoolConfig {
    /// Validate pool configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.pool_size == 0 {
            return Err("pool_size must be greater than 0".into());
        }
        if self.max_session_age_ms == 0 {
            return Err("max_session_age_ms must be greater than 0".into());
        }
        if self.cleanup_interval_ms == 0 {
            return Err("cleanup_interval_ms must be greater than 0".into());
        }
        if self.warmup_timeout_ms == 0 {
            return Err("warmup_timeout_ms must be greater than 0".into());
        }
        if self.max_launch_attempts == 0 {
            return Err("max_launch_attempts must be greater than 0".into());
        }
        Ok(())
    }

    /// Maximum session age.
    pub const fn max_session_age(&self) -> Duration {
        Duration::from_millis(self.max_session_age_ms)
    }

    /// Sweep period.
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Warm-up deadline.
    pub const fn warmup_timeout(&self) -> Duration {
        Duration::from_millis(self.warmup_timeout_ms)
    }

    /// Backoff before the next launch after `failures` consecutive failures,
    /// capped at one cleanup interval.
    pub fn launch_backoff(&self, failures: u32) -> Duration {
        let factor = 1_u64 << failures.min(16);
        Duration::from_millis(self.launch_backoff_ms.saturating_mul(factor)).min(self.cleanup_interval())
    }
}

/// Concurrency queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Tasks allowed to run at once.
    pub concurrency: usize,
    /// Length of the rate-limit window.
    pub interval_ms: u64,
    /// Task starts allowed per window.
    pub interval_cap: u32,
    /// Timeout applied to tasks that do not set their own.
    pub default_timeout_ms: u64,
    /// Pending tasks allowed before submissions are rejected. `None` is unbounded.
    pub max_queue_length: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            interval_ms: 1000,
            interval_cap: 3,
            default_timeout_ms: 5 * 60 * 1000,
            max_queue_length: None,
        }
    }
}

impl QueueConfig {
    /// Validate queue configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("concurrency must be greater than 0".into());
        }
        if self.interval_ms == 0 {
            return Err("interval_ms must be greater than 0".into());
        }
        if self.interval_cap == 0 {
            return Err("interval_cap must be greater than 0".into());
        }
        if self.default_timeout_ms == 0 {
            return Err("default_timeout_ms must be greater than 0".into());
        }
        if self.max_queue_length == Some(0) {
            return Err("max_queue_length must be greater than 0 when set".into());
        }
        Ok(())
    }

    /// Rate-limit window.
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Default per-task timeout.
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// TTLs for the named cache instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL for session-shaped data.
    pub session_ttl_secs: u64,
    /// TTL for longer-lived records.
    pub record_ttl_secs: u64,
    /// TTL for aggregate statistics.
    pub stats_ttl_secs: u64,
    /// Period of the background expiry sweep.
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 60,
            record_ttl_secs: 300,
            stats_ttl_secs: 30,
            cleanup_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    /// Validate cache configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.session_ttl_secs == 0 || self.record_ttl_secs == 0 || self.stats_ttl_secs == 0 {
            return Err("cache TTLs must be greater than 0".into());
        }
        if self.cleanup_interval_secs == 0 {
            return Err("cleanup_interval_secs must be greater than 0".into());
        }
        Ok(())
    }
}

/// Performance monitor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Ring buffer capacity.
    pub max_metrics: usize,
    /// Window used for dispatcher performance reports.
    pub report_window_minutes: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_metrics: crate::core::monitor::DEFAULT_MAX_METRICS,
            report_window_minutes: 60,
        }
    }
}

impl MonitorConfig {
    /// Validate monitor configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_metrics == 0 {
            return Err("max_metrics must be greater than 0".into());
        }
        if self.report_window_minutes == 0 {
            return Err("report_window_minutes must be greater than 0".into());
        }
        Ok(())
    }
}

/// Root service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Session pool settings.
    pub pool: PoolConfig,
    /// Execution queue settings.
    pub queue: QueueConfig,
    /// Cache TTLs.
    pub cache: CacheConfig,
    /// Monitor settings.
    pub monitor: MonitorConfig,
}

impl ServiceConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.pool.validate().map_err(|e| format!("pool invalid: {e}"))?;
        self.queue.validate().map_err(|e| format!("queue invalid: {e}"))?;
        self.cache.validate().map_err(|e| format!("cache invalid: {e}"))?;
        self.monitor
            .validate()
            .map_err(|e| format!("monitor invalid: {e}"))?;
        Ok(())
    }

    /// Parse service configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from defaults overridden by environment variables
    /// (a `.env` file is honoured if present), then validate.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut cfg = Self::default();

        override_with(&lookup, "PREWARM_POOL_SIZE", &mut cfg.pool.pool_size)?;
        override_with(&lookup, "PREWARM_MAX_SESSION_AGE_MS", &mut cfg.pool.max_session_age_ms)?;
        override_with(&lookup, "PREWARM_CLEANUP_INTERVAL_MS", &mut cfg.pool.cleanup_interval_ms)?;
        override_with(&lookup, "PREWARM_WARMUP_TIMEOUT_MS", &mut cfg.pool.warmup_timeout_ms)?;
        override_with(&lookup, "PREWARM_MAX_LAUNCH_ATTEMPTS", &mut cfg.pool.max_launch_attempts)?;
        override_with(&lookup, "PREWARM_LAUNCH_BACKOFF_MS", &mut cfg.pool.launch_backoff_ms)?;

        override_with(&lookup, "QUEUE_CONCURRENCY", &mut cfg.queue.concurrency)?;
        override_with(&lookup, "QUEUE_INTERVAL_MS", &mut cfg.queue.interval_ms)?;
        override_with(&lookup, "QUEUE_INTERVAL_CAP", &mut cfg.queue.interval_cap)?;
        override_with(&lookup, "QUEUE_TIMEOUT_MS", &mut cfg.queue.default_timeout_ms)?;
        if let Some(raw) = lookup("QUEUE_MAX_LENGTH") {
            cfg.queue.max_queue_length = Some(parse_value("QUEUE_MAX_LENGTH", &raw)?);
        }

        override_with(&lookup, "CACHE_SESSION_TTL_SECS", &mut cfg.cache.session_ttl_secs)?;
        override_with(&lookup, "CACHE_RECORD_TTL_SECS", &mut cfg.cache.record_ttl_secs)?;
        override_with(&lookup, "CACHE_STATS_TTL_SECS", &mut cfg.cache.stats_ttl_secs)?;
        override_with(&lookup, "CACHE_CLEANUP_INTERVAL_SECS", &mut cfg.cache.cleanup_interval_secs)?;

        override_with(&lookup, "MONITOR_MAX_METRICS", &mut cfg.monitor.max_metrics)?;
        override_with(&lookup, "MONITOR_REPORT_WINDOW_MINUTES", &mut cfg.monitor.report_window_minutes)?;

        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("{key}: cannot parse `{raw}`"))
}

fn override_with<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> Result<(), String> {
    if let Some(raw) = lookup(key) {
        *slot = parse_value(key, &raw)?;
    }
    Ok(())
}
