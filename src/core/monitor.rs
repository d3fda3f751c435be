//! Bounded metric buffer with percentile aggregation.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::util::clock::now_ms;

/// Default ring buffer capacity.
pub const DEFAULT_MAX_METRICS: usize = 10_000;

/// A single timed operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    /// Operation name, e.g. `resolver:executeCommand`.
    pub operation: String,
    /// Elapsed time in milliseconds.
    pub duration_ms: f64,
    /// Completion time (ms since epoch).
    pub timestamp_ms: u128,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Free-form context.
    pub metadata: Map<String, Value>,
}

/// Aggregate statistics for one operation over a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedMetric {
    /// Operation name.
    pub operation: String,
    /// Samples in the window.
    pub count: usize,
    /// Fastest sample.
    pub min_ms: f64,
    /// Slowest sample.
    pub max_ms: f64,
    /// Mean duration.
    pub average_ms: f64,
    /// 95th percentile.
    pub p95_ms: f64,
    /// 99th percentile.
    pub p99_ms: f64,
    /// Fraction of samples with `success == true`.
    pub success_rate: f64,
}

/// Sequential vs parallel comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    /// Average of the sequential operation.
    pub sequential_avg_ms: f64,
    /// Average of the parallel operation.
    pub parallel_avg_ms: f64,
    /// `sequential / parallel`, or 0 when either side has no data.
    pub speedup: f64,
}

/// Snapshot of all operations in a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    /// Window length in minutes.
    pub window_minutes: u64,
    /// Metrics currently buffered (all operations, any age).
    pub buffered: usize,
    /// Per-operation aggregates, sorted by operation name.
    pub operations: Vec<AggregatedMetric>,
}

/// Records operation timings in a bounded ring buffer.
pub struct PerformanceMonitor {
    max_metrics: usize,
    metrics: Mutex<VecDeque<Metric>>,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_METRICS)
    }
}

impl PerformanceMonitor {
    /// Create a monitor that keeps at most `max_metrics` samples.
    pub fn new(max_metrics: usize) -> Self {
        let max_metrics = max_metrics.max(1);
        Self {
            max_metrics,
            metrics: Mutex::new(VecDeque::with_capacity(max_metrics.min(1024))),
        }
    }

    /// Append a sample, dropping the oldest when the buffer is full.
    pub fn record_metric(
        &self,
        operation: impl Into<String>,
        duration: Duration,
        timestamp_ms: u128,
        metadata: Map<String, Value>,
    ) {
        let success = metadata
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        #[allow(clippy::cast_precision_loss)]
        let duration_ms = duration.as_nanos() as f64 / 1_000_000.0;
        let metric = Metric {
            operation: operation.into(),
            duration_ms,
            timestamp_ms,
            success,
            metadata,
        };
        let mut metrics = self.metrics.lock();
        if metrics.len() >= self.max_metrics {
            metrics.pop_front();
        }
        metrics.push_back(metric);
    }

    /// Record a sample stamped with the current time.
    pub fn record(&self, operation: impl Into<String>, duration: Duration, success: bool) {
        let mut metadata = Map::new();
        metadata.insert("success".into(), Value::Bool(success));
        self.record_metric(operation, duration, now_ms(), metadata);
    }

    /// Time `fut`, record the outcome, and return its result untouched.
    pub async fn measure<T, E, Fut>(
        &self,
        operation: &str,
        fut: Fut,
        metadata: Option<Map<String, Value>>,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let started = Instant::now();
        let result = fut.await;
        let elapsed = started.elapsed();

        let mut metadata = metadata.unwrap_or_default();
        metadata.insert("success".into(), Value::Bool(result.is_ok()));
        if let Err(e) = &result {
            metadata.insert("error".into(), Value::String(e.to_string()));
        }
        self.record_metric(operation, elapsed, now_ms(), metadata);
        result
    }

    /// Aggregate samples newer than `window`, grouped by operation.
    /// Passing `Some(op)` restricts the result to that operation.
    pub fn aggregated(&self, operation: Option<&str>, window: Duration) -> Vec<AggregatedMetric> {
        let cutoff = now_ms().saturating_sub(window.as_millis());
        let mut groups: BTreeMap<String, Vec<(f64, bool)>> = BTreeMap::new();
        {
            let metrics = self.metrics.lock();
            for m in metrics.iter() {
                if m.timestamp_ms < cutoff {
                    continue;
                }
                if operation.is_some_and(|op| op != m.operation) {
                    continue;
                }
                groups
                    .entry(m.operation.clone())
                    .or_default()
                    .push((m.duration_ms, m.success));
            }
        }

        groups
            .into_iter()
            .map(|(operation, samples)| summarize(operation, samples))
            .collect()
    }

    /// Aggregate for a single operation, if it has samples in the window.
    pub fn aggregated_for(&self, operation: &str, window: Duration) -> Option<AggregatedMetric> {
        self.aggregated(Some(operation), window).into_iter().next()
    }

    /// Compare a sequential and a parallel operation class.
    pub fn compare(&self, sequential_op: &str, parallel_op: &str, window: Duration) -> Comparison {
        let sequential_avg_ms = self
            .aggregated_for(sequential_op, window)
            .map_or(0.0, |m| m.average_ms);
        let parallel_avg_ms = self
            .aggregated_for(parallel_op, window)
            .map_or(0.0, |m| m.average_ms);
        let speedup = if sequential_avg_ms == 0.0 || parallel_avg_ms == 0.0 {
            0.0
        } else {
            sequential_avg_ms / parallel_avg_ms
        };
        Comparison {
            sequential_avg_ms,
            parallel_avg_ms,
            speedup,
        }
    }

    /// Aggregates for every operation over the last `window_minutes`.
    pub fn report(&self, window_minutes: u64) -> PerformanceReport {
        PerformanceReport {
            window_minutes,
            buffered: self.len(),
            operations: self.aggregated(
                None,
                Duration::from_secs(window_minutes.saturating_mul(60)),
            ),
        }
    }

    /// Raw samples, optionally filtered by operation, oldest first.
    pub fn metrics(&self, operation: Option<&str>) -> Vec<Metric> {
        self.metrics
            .lock()
            .iter()
            .filter(|m| operation.is_none_or(|op| op == m.operation))
            .cloned()
            .collect()
    }

    /// Number of buffered samples.
    pub fn len(&self) -> usize {
        self.metrics.lock().len()
    }

    /// Whether no samples are buffered.
    pub fn is_empty(&self) -> bool {
        self.metrics.lock().is_empty()
    }

    /// Drop all samples.
    pub fn clear(&self) {
        self.metrics.lock().clear();
    }
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let idx = (sorted.len() as f64 * q).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[allow(clippy::cast_precision_loss)]
fn summarize(operation: String, samples: Vec<(f64, bool)>) -> AggregatedMetric {
    let count = samples.len();
    let successes = samples.iter().filter(|(_, ok)| *ok).count();
    let mut durations: Vec<f64> = samples.into_iter().map(|(d, _)| d).collect();
    durations.sort_by(f64::total_cmp);
    let total: f64 = durations.iter().sum();

    AggregatedMetric {
        operation,
        count,
        min_ms: durations[0],
        max_ms: durations[count - 1],
        average_ms: total / count as f64,
        p95_ms: percentile(&durations, 0.95),
        p99_ms: percentile(&durations, 0.99),
        success_rate: successes as f64 / count as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_ms(monitor: &PerformanceMonitor, op: &str, ms: u64) {
        monitor.record(op, Duration::from_millis(ms), true);
    }

    #[test]
    fn test_aggregated_percentiles() {
        let monitor = PerformanceMonitor::default();
        for ms in [40, 10, 100, 30, 20] {
            record_ms(&monitor, "X", ms);
        }
        record_ms(&monitor, "Y", 5);

        let agg = monitor
            .aggregated_for("X", Duration::from_secs(300))
            .expect("X has samples");
        assert_eq!(agg.count, 5);
        assert!((agg.average_ms - 40.0).abs() < 1e-9);
        assert!((agg.min_ms - 10.0).abs() < 1e-9);
        assert!((agg.max_ms - 100.0).abs() < 1e-9);
        assert!((agg.p95_ms - 100.0).abs() < 1e-9);
        assert!((agg.p99_ms - 100.0).abs() < 1e-9);

        let all = monitor.aggregated(None, Duration::from_secs(300));
        let names: Vec<_> = all.iter().map(|a| a.operation.as_str()).collect();
        assert_eq!(names, vec!["X", "Y"]);
    }

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let monitor = PerformanceMonitor::new(3);
        for ms in 1..=5 {
            record_ms(&monitor, "op", ms);
        }
        let kept: Vec<f64> = monitor.metrics(Some("op")).iter().map(|m| m.duration_ms).collect();
        assert_eq!(kept, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_unbounded_report_window_saturates() {
        let monitor = PerformanceMonitor::default();
        record_ms(&monitor, "op", 10);

        let report = monitor.report(u64::MAX);
        assert_eq!(report.window_minutes, u64::MAX);
        assert_eq!(report.operations.len(), 1);
        assert_eq!(report.operations[0].count, 1);
    }

    #[test]
    fn test_window_excludes_old_samples() {
        let monitor = PerformanceMonitor::default();
        let mut meta = Map::new();
        meta.insert("success".into(), Value::Bool(true));
        let two_hours_ago = now_ms() - 2 * 60 * 60 * 1000;
        monitor.record_metric("op", Duration::from_millis(500), two_hours_ago, meta);
        record_ms(&monitor, "op", 10);

        let agg = monitor.aggregated_for("op", Duration::from_secs(60 * 60)).unwrap();
        assert_eq!(agg.count, 1);
        assert!((agg.max_ms - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_measure_records_failure_and_returns_error() {
        let monitor = PerformanceMonitor::default();
        let ok: Result<u32, String> = monitor.measure("work", async { Ok(7) }, None).await;
        assert_eq!(ok, Ok(7));

        let err: Result<u32, String> = monitor
            .measure("work", async { Err("boom".to_string()) }, None)
            .await;
        assert_eq!(err, Err("boom".to_string()));

        let samples = monitor.metrics(Some("work"));
        assert_eq!(samples.len(), 2);
        assert!(samples[0].success);
        assert!(!samples[1].success);
        assert_eq!(samples[1].metadata.get("error"), Some(&Value::String("boom".into())));

        let agg = monitor.aggregated_for("work", Duration::from_secs(60)).unwrap();
        assert!((agg.success_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_compare_speedup() {
        let monitor = PerformanceMonitor::default();
        record_ms(&monitor, "sequential", 300);
        record_ms(&monitor, "parallel", 100);
        let cmp = monitor.compare("sequential", "parallel", Duration::from_secs(60));
        assert!((cmp.speedup - 3.0).abs() < 1e-6);

        let none = monitor.compare("missing", "parallel", Duration::from_secs(60));
        assert!(none.speedup.abs() < f64::EPSILON);
    }
}
