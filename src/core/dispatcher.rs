//! Command dispatcher.
//!
//! Resolves a session for each prompt (the caller's claimed session, a fresh
//! claim from the pool, or an ad-hoc launch when the pool is empty), runs the
//! turn through the [`ConcurrencyQueue`], and records timing in the
//! [`PerformanceMonitor`]. Every command publishes `command.started` followed
//! by `command.completed` or `command.failed`, all sharing one correlation id.
//!
//! Sessions resolved for a request without a caller are handed back as soon
//! as the turn ends. Sessions kept by a caller stay theirs until released or
//! idle for longer than `max_session_age`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::{
    with_cache, AgentSession, BoxFuture, CacheNamespaces, ConcurrencyQueue, EventBus,
    LaunchError, PerformanceMonitor, PerformanceReport, PoolError, QueueError, SessionLauncher,
    SessionPool, SessionStatus, TaskOptions,
};
use crate::runtime::api::{
    ClaimResponse, CommandMetadata, ExecuteCommandRequest, ExecuteCommandResponse, PreWarmMetrics,
    PreWarmStatus, SessionInfo, SessionSource,
};
use crate::util::clock::now_ms;

/// Operation name recorded for every executed command.
pub const EXECUTE_OPERATION: &str = "resolver:executeCommand";

const DEFAULT_REPORT_WINDOW_MINUTES: u64 = 60;

/// Cache namespaces used by the dispatcher.
pub type DispatcherCaches = CacheNamespaces<SessionInfo, ExecuteCommandResponse, PerformanceReport>;

type ReportFn = Box<dyn Fn(u64) -> BoxFuture<'static, Result<PerformanceReport, Infallible>> + Send + Sync>;

#[derive(Debug, Error)]
enum CommandError {
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

struct AdHocSession {
    handle: Arc<dyn AgentSession>,
    owner: Option<String>,
    created_at: Instant,
    created_at_ms: u128,
    last_used_at: Instant,
}

#[derive(Default)]
struct ServedBy {
    session_id: Option<String>,
    pid: Option<u32>,
    source: Option<SessionSource>,
}

/// Entry point for the request-handling layer.
pub struct Dispatcher {
    pool: Arc<SessionPool>,
    queue: ConcurrencyQueue,
    monitor: Arc<PerformanceMonitor>,
    launcher: Arc<dyn SessionLauncher>,
    events: Arc<EventBus>,
    caches: Arc<DispatcherCaches>,
    adhoc: Mutex<HashMap<String, AdHocSession>>,
    report: ReportFn,
    report_window_minutes: u64,
}

impl Dispatcher {
    /// Wire a dispatcher over already-built services.
    pub fn new(
        pool: Arc<SessionPool>,
        queue: ConcurrencyQueue,
        monitor: Arc<PerformanceMonitor>,
        launcher: Arc<dyn SessionLauncher>,
        events: Arc<EventBus>,
        caches: Arc<DispatcherCaches>,
    ) -> Self {
        let reporter = Arc::clone(&monitor);
        let report: ReportFn = Box::new(with_cache(
            Arc::clone(&caches.stats),
            |window: &u64| format!("report:{window}"),
            None,
            move |window: u64| {
                let report = reporter.report(window);
                async move { Ok::<_, Infallible>(report) }
            },
        ));
        Self {
            pool,
            queue,
            monitor,
            launcher,
            events,
            caches,
            adhoc: Mutex::new(HashMap::new()),
            report,
            report_window_minutes: DEFAULT_REPORT_WINDOW_MINUTES,
        }
    }

    /// Window used by [`Dispatcher::recent_performance`].
    #[must_use]
    pub fn with_report_window(mut self, minutes: u64) -> Self {
        self.report_window_minutes = minutes;
        self
    }

    /// Underlying session pool.
    pub const fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    /// Underlying execution queue.
    pub const fn queue(&self) -> &ConcurrencyQueue {
        &self.queue
    }

    /// Run one prompt. Failures are reported in the response, never as `Err`.
    pub async fn execute_command(&self, request: ExecuteCommandRequest) -> ExecuteCommandResponse {
        let correlation_id = Uuid::new_v4().to_string();
        let start_time = now_ms();
        self.events.emit(
            "command.started",
            Some(&correlation_id),
            json!({ "sessionId": request.session_id, "caller": request.caller }),
        );

        let mut metadata = Map::new();
        metadata.insert("correlationId".into(), Value::String(correlation_id.clone()));
        let mut served = ServedBy::default();
        let result = self
            .monitor
            .measure(EXECUTE_OPERATION, self.run_turn(&request, &mut served), Some(metadata))
            .await;

        let response = match result {
            Ok(output) => {
                tracing::info!(
                    correlation_id = %correlation_id,
                    session_id = ?served.session_id,
                    source = ?served.source,
                    "command completed"
                );
                self.events.emit(
                    "command.completed",
                    Some(&correlation_id),
                    json!({ "sessionId": served.session_id, "source": served.source }),
                );
                ExecuteCommandResponse {
                    session_id: served.session_id,
                    success: true,
                    error: None,
                    initial_response: Some(output),
                    metadata: CommandMetadata {
                        start_time,
                        pid: served.pid,
                        source: served.source,
                        correlation_id,
                    },
                }
            }
            Err(e) => {
                tracing::warn!(
                    correlation_id = %correlation_id,
                    session_id = ?served.session_id,
                    error = %e,
                    "command failed"
                );
                self.events.emit(
                    "command.failed",
                    Some(&correlation_id),
                    json!({ "sessionId": served.session_id, "error": e.to_string() }),
                );
                ExecuteCommandResponse {
                    session_id: served.session_id,
                    success: false,
                    error: Some(e.to_string()),
                    initial_response: None,
                    metadata: CommandMetadata {
                        start_time,
                        pid: served.pid,
                        source: served.source,
                        correlation_id,
                    },
                }
            }
        };

        if let Some(id) = &response.session_id {
            self.caches.records.set(id.clone(), response.clone(), None);
            self.caches.sessions.delete(id);
            if request.caller.is_none() {
                self.hand_back(id, response.metadata.source, response.success);
            }
        }
        response
    }

    /// Give back a session resolved for a request nobody can follow up on.
    /// Pool sessions re-warm after a clean turn and are expired otherwise;
    /// ad-hoc sessions are terminated.
    fn hand_back(&self, id: &str, source: Option<SessionSource>, clean: bool) {
        match source {
            Some(SessionSource::Pool) => {
                let returned = if clean {
                    self.pool.release_for(id, None).map(|_| ())
                } else {
                    self.pool.expire(id)
                };
                if let Err(e) = returned {
                    tracing::debug!(session_id = %id, error = %e, "pool session already gone");
                }
            }
            Some(SessionSource::AdHoc) => {
                if let Some(session) = self.adhoc.lock().remove(id) {
                    tracing::debug!(session_id = %id, "terminating one-shot ad-hoc session");
                    tokio::spawn(async move { session.handle.terminate().await });
                }
            }
            Some(SessionSource::Reused) | None => {}
        }
    }

    async fn run_turn(
        &self,
        request: &ExecuteCommandRequest,
        served: &mut ServedBy,
    ) -> Result<String, CommandError> {
        let (session_id, handle, source) = self.resolve(request).await?;
        served.session_id = Some(session_id.clone());
        served.pid = handle.pid();
        served.source = Some(source);

        let cancellable = self.launcher.cancellable();
        let turn = {
            let handle = Arc::clone(&handle);
            let prompt = request.prompt.clone();
            async move {
                handle.send(&prompt).await?;
                handle.read_output().await
            }
        };
        self.touch(&session_id);
        let options = TaskOptions::default().cancellable(cancellable);
        let outcome = match self.queue.enqueue_with(turn, options) {
            Ok(task) => task.await,
            Err(e) => Err(e),
        };
        self.touch(&session_id);

        match outcome {
            Ok(output) => Ok(output?),
            Err(QueueError::TaskTimeout(after)) => {
                if cancellable {
                    if let Err(e) = handle.cancel().await {
                        tracing::debug!(session_id = %session_id, error = %e, "cancel after timeout failed");
                    }
                }
                Err(QueueError::TaskTimeout(after).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve(
        &self,
        request: &ExecuteCommandRequest,
    ) -> Result<(String, Arc<dyn AgentSession>, SessionSource), CommandError> {
        let caller = request.caller.as_deref();
        if let Some(id) = request.session_id.as_deref() {
            if let Some(claimed) = self.pool.claimed_session(id, caller) {
                return Ok((claimed.id, claimed.handle, SessionSource::Reused));
            }
            let adhoc = self
                .adhoc
                .lock()
                .get_mut(id)
                .filter(|s| s.owner.as_deref() == caller)
                .map(|s| {
                    s.last_used_at = Instant::now();
                    Arc::clone(&s.handle)
                });
            if let Some(handle) = adhoc {
                return Ok((id.to_owned(), handle, SessionSource::Reused));
            }
            tracing::debug!(session_id = %id, "requested session not held by caller; claiming");
        }

        let claim = match caller {
            Some(owner) => self.pool.claim_for(owner),
            None => self.pool.claim(),
        };
        match claim {
            Ok(claimed) => {
                self.caches.sessions.delete(&claimed.id);
                Ok((claimed.id, claimed.handle, SessionSource::Pool))
            }
            Err(PoolError::PoolExhausted) => {
                let (id, handle) = self.launch_adhoc(caller).await?;
                Ok((id, handle, SessionSource::AdHoc))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn launch_adhoc(
        &self,
        owner: Option<&str>,
    ) -> Result<(String, Arc<dyn AgentSession>), CommandError> {
        let timeout = self.pool.config().warmup_timeout();
        tracing::info!("pool exhausted; launching ad-hoc session");
        let handle = match tokio::time::timeout(timeout, self.launcher.launch()).await {
            Ok(launched) => launched?,
            Err(_) => return Err(PoolError::WarmupTimeout(timeout).into()),
        };
        let id = Uuid::new_v4().to_string();
        let now = Instant::now();
        self.adhoc.lock().insert(
            id.clone(),
            AdHocSession {
                handle: Arc::clone(&handle),
                owner: owner.map(str::to_owned),
                created_at: now,
                created_at_ms: now_ms(),
                last_used_at: now,
            },
        );
        Ok((id, handle))
    }

    fn touch(&self, id: &str) {
        if self.pool.touch(id) {
            return;
        }
        if let Some(session) = self.adhoc.lock().get_mut(id) {
            session.last_used_at = Instant::now();
        }
    }

    /// Claim a pre-warmed session for `caller`.
    pub fn claim_pre_warmed_session(&self, caller: Option<&str>) -> ClaimResponse {
        let claim = match caller {
            Some(owner) => self.pool.claim_for(owner),
            None => self.pool.claim(),
        };
        match claim {
            Ok(claimed) => {
                self.caches.sessions.delete(&claimed.id);
                ClaimResponse {
                    success: true,
                    session_id: Some(claimed.id),
                    status: Some(SessionStatus::Claimed),
                    error: None,
                }
            }
            Err(e) => ClaimResponse {
                success: false,
                session_id: None,
                status: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Return a session held by `caller`: pool sessions go back to warming,
    /// ad-hoc sessions are terminated.
    ///
    /// # Errors
    ///
    /// [`PoolError::NotClaimed`] when `caller` does not hold the session, or
    /// [`PoolError::UnknownSession`] for an unknown id.
    pub fn release_session(
        &self,
        id: &str,
        caller: Option<&str>,
    ) -> Result<SessionStatus, PoolError> {
        let adhoc = {
            let mut adhoc = self.adhoc.lock();
            match adhoc.get(id).map(|s| s.owner.as_deref() == caller) {
                Some(false) => return Err(PoolError::NotClaimed(id.to_owned())),
                Some(true) => adhoc.remove(id),
                None => None,
            }
        };
        let released = match adhoc {
            Some(session) => {
                tracing::info!(session_id = %id, "ad-hoc session released; terminating");
                tokio::spawn(async move { session.handle.terminate().await });
                Ok(SessionStatus::Expired)
            }
            None => self.pool.release_for(id, caller),
        };
        if released.is_ok() {
            self.caches.sessions.delete(&id.to_owned());
        }
        released
    }

    /// Terminate ad-hoc sessions idle for longer than `max_session_age`.
    /// Returns how many were dropped.
    pub fn sweep_adhoc(&self) -> usize {
        let max_idle = self.pool.config().max_session_age();
        let stale: Vec<(String, AdHocSession)> = {
            let mut adhoc = self.adhoc.lock();
            let ids: Vec<String> = adhoc
                .iter()
                .filter(|(_, s)| s.last_used_at.elapsed() > max_idle)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| adhoc.remove(&id).map(|s| (id, s)))
                .collect()
        };
        let count = stale.len();
        for (id, session) in stale {
            tracing::info!(session_id = %id, "evicting idle ad-hoc session");
            self.caches.sessions.delete(&id);
            tokio::spawn(async move { session.handle.terminate().await });
        }
        count
    }

    /// Run [`Dispatcher::sweep_adhoc`] every `cleanup_interval`.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let dispatcher = Arc::downgrade(self);
        let period = self.pool.config().cleanup_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(dispatcher) = dispatcher.upgrade() else {
                    break;
                };
                dispatcher.sweep_adhoc();
            }
        })
    }

    /// Current warm-up status.
    pub fn pre_warm_status(&self) -> PreWarmStatus {
        self.pool.status()
    }

    /// Pool metrics snapshot.
    pub fn pre_warm_metrics(&self) -> PreWarmMetrics {
        self.pool.metrics()
    }

    /// Stream of warm-up status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<PreWarmStatus> {
        self.pool.subscribe_status()
    }

    /// Aggregated timings over the last `window_minutes`, cached briefly.
    pub async fn performance_report(&self, window_minutes: u64) -> PerformanceReport {
        match (self.report)(window_minutes).await {
            Ok(report) => report,
            Err(never) => match never {},
        }
    }

    /// Performance report over the configured window.
    pub async fn recent_performance(&self) -> PerformanceReport {
        self.performance_report(self.report_window_minutes).await
    }

    /// Listing row for a pool or ad-hoc session, cached briefly.
    pub fn session_details(&self, id: &str) -> Option<SessionInfo> {
        let key = id.to_owned();
        if let Some(hit) = self.caches.sessions.get(&key) {
            return Some(hit);
        }
        let info = self.pool.session_info(id).or_else(|| {
            self.adhoc.lock().get(id).map(|s| SessionInfo {
                session_id: key.clone(),
                external_session_id: s.handle.external_id(),
                status: SessionStatus::Claimed,
                age: u64::try_from(s.created_at.elapsed().as_millis()).unwrap_or(u64::MAX),
                created_at: s.created_at_ms,
            })
        })?;
        self.caches.sessions.set(key, info.clone(), None);
        Some(info)
    }

    /// Most recent response served by `session_id`.
    pub fn last_response(&self, session_id: &str) -> Option<ExecuteCommandResponse> {
        self.caches.records.get(&session_id.to_owned())
    }

    /// Number of live ad-hoc sessions.
    pub fn adhoc_sessions(&self) -> usize {
        self.adhoc.lock().len()
    }

    /// Terminate every ad-hoc session.
    pub async fn shutdown(&self) {
        let sessions: Vec<AdHocSession> = self.adhoc.lock().drain().map(|(_, s)| s).collect();
        tracing::info!(adhoc = sessions.len(), "dispatcher shutting down");
        for session in sessions {
            session.handle.terminate().await;
        }
    }
}
