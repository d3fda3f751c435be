//! In-memory launcher for development/testing.
//!
//! Sessions echo prompts back after a configurable delay. Launch latency,
//! launch failures, and cancellation support are scriptable.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::core::{AgentSession, LaunchError, SessionLauncher};

#[derive(Default)]
struct LauncherCounters {
    attempts: AtomicU64,
    launched: AtomicU64,
    terminated: AtomicU64,
    resets: AtomicU64,
}

/// Scriptable in-process launcher.
pub struct InMemoryLauncher {
    launch_delay: Duration,
    response_delay: Duration,
    cancellable: bool,
    failures_remaining: AtomicU32,
    counters: Arc<LauncherCounters>,
}

impl Default for InMemoryLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLauncher {
    /// Launcher with no artificial latency.
    pub fn new() -> Self {
        Self {
            launch_delay: Duration::ZERO,
            response_delay: Duration::ZERO,
            cancellable: false,
            failures_remaining: AtomicU32::new(0),
            counters: Arc::new(LauncherCounters::default()),
        }
    }

    /// Delay every launch by `delay`.
    #[must_use]
    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    /// Delay every response by `delay`.
    #[must_use]
    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    /// Report (and honour) cancellation support.
    #[must_use]
    pub fn with_cancellation(mut self, cancellable: bool) -> Self {
        self.cancellable = cancellable;
        self
    }

    /// Make the next `count` launches fail.
    pub fn fail_next_launches(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Launch calls so far, failed ones included.
    pub fn attempts(&self) -> u64 {
        self.counters.attempts.load(Ordering::SeqCst)
    }

    /// Sessions successfully launched so far.
    pub fn launched(&self) -> u64 {
        self.counters.launched.load(Ordering::SeqCst)
    }

    /// Sessions torn down so far.
    pub fn terminated(&self) -> u64 {
        self.counters.terminated.load(Ordering::SeqCst)
    }

    /// Resets performed on released sessions.
    pub fn resets(&self) -> u64 {
        self.counters.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionLauncher for InMemoryLauncher {
    fn cancellable(&self) -> bool {
        self.cancellable
    }

    async fn launch(&self) -> Result<Arc<dyn AgentSession>, LaunchError> {
        self.counters.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(LaunchError::Spawn("scripted launch failure".into()));
        }
        self.counters.launched.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemorySession {
            external_id: Uuid::new_v4().to_string(),
            response_delay: self.response_delay,
            outbox: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            terminated: AtomicBool::new(false),
            cancel: Notify::new(),
            counters: Arc::clone(&self.counters),
        }))
    }
}

/// Session produced by [`InMemoryLauncher`]; replies `echo: <prompt>`.
pub struct InMemorySession {
    external_id: String,
    response_delay: Duration,
    outbox: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    terminated: AtomicBool,
    cancel: Notify,
    counters: Arc<LauncherCounters>,
}

impl InMemorySession {
    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Whether the session has been torn down.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentSession for InMemorySession {
    fn external_id(&self) -> Option<String> {
        Some(self.external_id.clone())
    }

    async fn send(&self, prompt: &str) -> Result<(), LaunchError> {
        if self.is_terminated() {
            return Err(LaunchError::Closed);
        }
        self.prompts.lock().push(prompt.to_owned());
        self.outbox.lock().push_back(format!("echo: {prompt}"));
        Ok(())
    }

    async fn read_output(&self) -> Result<String, LaunchError> {
        if !self.response_delay.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(self.response_delay) => {}
                () = self.cancel.notified() => {
                    return Err(LaunchError::Remote("turn cancelled".into()));
                }
            }
        }
        if self.is_terminated() {
            return Err(LaunchError::Closed);
        }
        self.outbox.lock().pop_front().ok_or(LaunchError::Closed)
    }

    async fn reset(&self) -> Result<(), LaunchError> {
        if self.is_terminated() {
            return Err(LaunchError::Closed);
        }
        self.outbox.lock().clear();
        self.counters.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cancel(&self) -> Result<(), LaunchError> {
        self.cancel.notify_waiters();
        Ok(())
    }

    async fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            self.counters.terminated.fetch_add(1, Ordering::SeqCst);
        }
    }
}
