//! Build the full service graph from a [`ServiceConfig`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::config::ServiceConfig;
use crate::core::dispatcher::DispatcherCaches;
use crate::core::{
    AppResult, ConcurrencyQueue, Dispatcher, EventBus, PerformanceMonitor, SessionLauncher,
    SessionPool,
};

/// History kept by the event bus unless overridden.
const DEFAULT_EVENT_HISTORY: usize = 1000;

/// Assembles [`Services`] from configuration and a launcher.
pub struct ServiceBuilder {
    config: ServiceConfig,
    launcher: Option<Arc<dyn SessionLauncher>>,
    events: Option<Arc<EventBus>>,
}

impl ServiceBuilder {
    /// Start from an explicit configuration.
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            launcher: None,
            events: None,
        }
    }

    /// Start from `PREWARM_*`, `QUEUE_*`, `CACHE_*` and `MONITOR_*` variables.
    ///
    /// # Errors
    ///
    /// Fails when a variable does not parse or the result is invalid.
    pub fn from_env() -> AppResult<Self> {
        let config = ServiceConfig::from_env().map_err(|e| anyhow!("config invalid: {e}"))?;
        Ok(Self::new(config))
    }

    /// Launcher used for pre-warmed and ad-hoc sessions.
    #[must_use]
    pub fn with_launcher(mut self, launcher: Arc<dyn SessionLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Share an existing event bus instead of creating one.
    #[must_use]
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate configuration and construct every service. Nothing runs
    /// until [`Services::start`].
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or a missing launcher.
    pub fn build(self) -> AppResult<Services> {
        self.config
            .validate()
            .map_err(|e| anyhow!("config invalid: {e}"))?;
        let launcher = self.launcher.context("a session launcher is required")?;
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(EventBus::new(DEFAULT_EVENT_HISTORY)));

        let caches = Arc::new(DispatcherCaches::new(&self.config.cache));
        let monitor = Arc::new(PerformanceMonitor::new(self.config.monitor.max_metrics));
        let queue = ConcurrencyQueue::new(self.config.queue.clone());
        let pool = Arc::new(
            SessionPool::new(self.config.pool.clone(), Arc::clone(&launcher))
                .with_events(Arc::clone(&events)),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&pool),
            queue.clone(),
            Arc::clone(&monitor),
            launcher,
            Arc::clone(&events),
            Arc::clone(&caches),
        )
        .with_report_window(self.config.monitor.report_window_minutes));

        tracing::debug!(
            pool_size = self.config.pool.pool_size,
            concurrency = self.config.queue.concurrency,
            "services built"
        );
        Ok(Services {
            config: self.config,
            caches,
            monitor,
            queue,
            pool,
            events,
            dispatcher,
            background: Mutex::new(Vec::new()),
        })
    }
}

/// The wired service graph.
pub struct Services {
    /// Effective configuration.
    pub config: ServiceConfig,
    /// Session, record and stats caches.
    pub caches: Arc<DispatcherCaches>,
    /// Timing buffer.
    pub monitor: Arc<PerformanceMonitor>,
    /// Execution queue.
    pub queue: ConcurrencyQueue,
    /// Pre-warmed session pool.
    pub pool: Arc<SessionPool>,
    /// Event bus.
    pub events: Arc<EventBus>,
    /// Request entry point.
    pub dispatcher: Arc<Dispatcher>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Services {
    /// Begin warming the pool, sweeping caches and evicting idle ad-hoc
    /// sessions. Must be called inside a tokio runtime.
    pub fn start(&self) {
        self.pool.start();
        let interval = Duration::from_secs(self.config.cache.cleanup_interval_secs);
        let mut background = self.background.lock();
        if background.is_empty() {
            background.extend(self.caches.spawn_cleanup(interval));
            background.push(self.dispatcher.spawn_sweeper());
        }
        tracing::info!("services started");
    }

    /// Stop accepting work, terminate every session and stop background tasks.
    pub async fn shutdown(&self) {
        self.queue.shutdown();
        self.dispatcher.shutdown().await;
        self.pool.shutdown().await;
        for handle in self.background.lock().drain(..) {
            handle.abort();
        }
        self.caches.clear_all();
        tracing::info!("services stopped");
    }
}
