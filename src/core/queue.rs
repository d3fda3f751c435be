//! Bounded-worker, rate-limited FIFO task queue.
//!
//! A task starts only when a worker slot is free and the fixed-window rate
//! limiter still has a token for the current window. Pending tasks live in a
//! single deque drained under one lock, so start order is submission order.
//!
//! Each running task is raced against its timeout. On expiry the caller gets
//! [`QueueError::TaskTimeout`] and the slot is released at once; the work is
//! aborted when the task was submitted as cancellable, otherwise it keeps
//! running detached and its result is dropped.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{oneshot, Notify};

use crate::config::QueueConfig;
use crate::core::{BoxFuture, QueueError};

/// Per-task submission options.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskOptions {
    /// Overrides the queue's default timeout.
    pub timeout: Option<Duration>,
    /// Abort the work on timeout instead of abandoning it.
    pub cancellable: bool,
}

impl TaskOptions {
    /// Options with an explicit timeout.
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancellable: false,
        }
    }

    /// Mark the task as cancellable.
    #[must_use]
    pub const fn cancellable(mut self, cancellable: bool) -> Self {
        self.cancellable = cancellable;
        self
    }
}

/// Queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Worker budget.
    pub concurrency: usize,
    /// Tasks waiting to start.
    pub pending: usize,
    /// Tasks currently running.
    pub running: usize,
    /// Tasks that produced a value.
    pub completed: u64,
    /// Tasks that panicked.
    pub failed: u64,
    /// Tasks that hit their timeout.
    pub timed_out: u64,
    /// Submissions rejected for backpressure or shutdown.
    pub rejected: u64,
}

#[derive(Debug, Clone, Copy)]
enum TaskOutcome {
    Completed,
    Failed,
    TimedOut,
}

struct PendingTask {
    id: u64,
    enqueued_at: Instant,
    run: BoxFuture<'static, TaskOutcome>,
}

struct QueueState {
    pending: VecDeque<PendingTask>,
    running: usize,
    window_start: Instant,
    started_in_window: u32,
    timer_armed: bool,
    closed: bool,
    next_id: u64,
    completed: u64,
    failed: u64,
    timed_out: u64,
    rejected: u64,
}

struct Inner {
    config: QueueConfig,
    state: Mutex<QueueState>,
    idle: Notify,
}

/// Future resolving to a queued task's outcome.
pub struct QueuedTask<T> {
    id: u64,
    rx: oneshot::Receiver<Result<T, QueueError>>,
}

impl<T> QueuedTask<T> {
    /// Queue-assigned task id.
    pub const fn id(&self) -> u64 {
        self.id
    }
}

impl<T> Future for QueuedTask<T> {
    type Output = Result<T, QueueError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(QueueError::Shutdown)))
    }
}

/// Concurrency- and rate-limited FIFO scheduler. Cloning shares the queue.
#[derive(Clone)]
pub struct ConcurrencyQueue {
    inner: Arc<Inner>,
}

impl ConcurrencyQueue {
    /// Create a queue from configuration.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    running: 0,
                    window_start: Instant::now(),
                    started_in_window: 0,
                    timer_armed: false,
                    closed: false,
                    next_id: 0,
                    completed: 0,
                    failed: 0,
                    timed_out: 0,
                    rejected: 0,
                }),
                idle: Notify::new(),
            }),
        }
    }

    /// Queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Submit `fut` with default options. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`QueueError::Backpressure`] when the pending queue is full,
    /// [`QueueError::Shutdown`] after [`ConcurrencyQueue::shutdown`].
    pub fn enqueue<F, T>(&self, fut: F) -> Result<QueuedTask<T>, QueueError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue_with(fut, TaskOptions::default())
    }

    /// Submit `fut` with explicit options.
    ///
    /// # Errors
    ///
    /// See [`ConcurrencyQueue::enqueue`].
    pub fn enqueue_with<F, T>(&self, fut: F, options: TaskOptions) -> Result<QueuedTask<T>, QueueError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.inner.config.default_timeout());
        let cancellable = options.cancellable;
        let (tx, rx) = oneshot::channel();

        let id = {
            let mut state = self.inner.state.lock();
            if state.closed {
                state.rejected += 1;
                return Err(QueueError::Shutdown);
            }
            if let Some(max) = self.inner.config.max_queue_length {
                if state.pending.len() >= max {
                    state.rejected += 1;
                    tracing::warn!(pending = state.pending.len(), max, "task rejected: queue full");
                    return Err(QueueError::Backpressure {
                        pending: state.pending.len(),
                        max,
                    });
                }
            }
            let id = state.next_id;
            state.next_id += 1;

            let run: BoxFuture<'static, TaskOutcome> = Box::pin(async move {
                let mut work = tokio::spawn(fut);
                let waited = tokio::time::timeout(timeout, &mut work).await;
                let (outcome, result) = match waited {
                    Ok(Ok(value)) => (TaskOutcome::Completed, Ok(value)),
                    Ok(Err(join_err)) => (
                        TaskOutcome::Failed,
                        Err(QueueError::Panicked(join_err.to_string())),
                    ),
                    Err(_) => {
                        if cancellable {
                            work.abort();
                        }
                        tracing::warn!(task_id = id, ?timeout, cancellable, "task timed out");
                        (TaskOutcome::TimedOut, Err(QueueError::TaskTimeout(timeout)))
                    }
                };
                let _ = tx.send(result);
                outcome
            });
            state.pending.push_back(PendingTask {
                id,
                enqueued_at: Instant::now(),
                run,
            });
            id
        };
        tracing::debug!(task_id = id, "task enqueued");

        self.inner.pump();
        Ok(QueuedTask { id, rx })
    }

    /// Current counters.
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        QueueStats {
            concurrency: self.inner.config.concurrency,
            pending: state.pending.len(),
            running: state.running,
            completed: state.completed,
            failed: state.failed,
            timed_out: state.timed_out,
            rejected: state.rejected,
        }
    }

    /// Whether nothing is pending or running.
    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        state.running == 0 && state.pending.is_empty()
    }

    /// Resolve once the queue is empty and no task is running.
    pub async fn idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Drop every pending task; their callers receive [`QueueError::Shutdown`].
    /// Running tasks are unaffected.
    pub fn clear(&self) -> usize {
        let (dropped, idle) = {
            let mut state = self.inner.state.lock();
            let dropped: Vec<PendingTask> = state.pending.drain(..).collect();
            (dropped, state.running == 0)
        };
        let count = dropped.len();
        drop(dropped);
        if count > 0 {
            tracing::info!(count, "cleared pending tasks");
        }
        if idle {
            self.inner.idle.notify_waiters();
        }
        count
    }

    /// Reject further submissions and clear pending tasks.
    pub fn shutdown(&self) {
        self.inner.state.lock().closed = true;
        self.clear();
    }
}

impl Inner {
    /// Start as many pending tasks as the worker budget and rate window allow.
    fn pump(self: &Arc<Self>) {
        let interval = self.config.interval();
        let mut ready = Vec::new();
        let mut rearm_at = None;
        {
            let mut state = self.state.lock();
            while state.running < self.config.concurrency && !state.pending.is_empty() {
                let now = Instant::now();
                if now.duration_since(state.window_start) >= interval {
                    state.window_start = now;
                    state.started_in_window = 0;
                }
                if state.started_in_window >= self.config.interval_cap {
                    if !state.timer_armed {
                        state.timer_armed = true;
                        rearm_at = Some(state.window_start + interval);
                    }
                    break;
                }
                let Some(task) = state.pending.pop_front() else {
                    break;
                };
                state.running += 1;
                state.started_in_window += 1;
                ready.push(task);
            }
        }

        for task in ready {
            tracing::debug!(
                task_id = task.id,
                waited_ms = task.enqueued_at.elapsed().as_millis(),
                "task started"
            );
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                let outcome = task.run.await;
                inner.finish(outcome);
            });
        }

        if let Some(at) = rearm_at {
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep_until(at.into()).await;
                inner.state.lock().timer_armed = false;
                inner.pump();
            });
        }
    }

    fn finish(self: &Arc<Self>, outcome: TaskOutcome) {
        let idle = {
            let mut state = self.state.lock();
            state.running -= 1;
            match outcome {
                TaskOutcome::Completed => state.completed += 1,
                TaskOutcome::Failed => state.failed += 1,
                TaskOutcome::TimedOut => state.timed_out += 1,
            }
            state.running == 0 && state.pending.is_empty()
        };
        if idle {
            self.idle.notify_waiters();
        }
        self.pump();
    }
}
