//! Pre-warmed session pool.
//!
//! Keeps up to `pool_size` agent sessions warming, ready, or claimed. A
//! background loop launches replacements whenever capacity frees up and
//! sweeps out sessions older than `max_session_age` every
//! `cleanup_interval`.
//!
//! Slot lifecycle:
//!
//! ```text
//! EMPTY -> WARMING -> READY -> CLAIMED -> RELEASED -> WARMING
//!             |                   |
//!             v                   v
//!           FAILED -> EMPTY    EXPIRED -> EMPTY
//! ```
//!
//! Every transition is applied under a single `parking_lot::Mutex` and never
//! across an `.await`, so two claims can never hand out the same session and
//! the slot count never exceeds `pool_size`. Launches reserve their WARMING
//! slot before any I/O starts.

use std::collections::HashMap;
use std::future::pending;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::core::{AgentSession, EventBus, PoolError, SessionLauncher};
use crate::runtime::api::{
    ConfiguredPool, PoolCounts, PreWarmMetrics, PreWarmStatus, SessionInfo, WarmPhase,
};
use crate::util::clock::now_ms;

/// Pool-assigned session identifier (UUID v4, never reused).
pub type SessionId = String;

/// Lifecycle state of a pooled session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Launching or re-warming.
    Warming,
    /// Available to claim.
    Ready,
    /// Owned by one caller.
    Claimed,
    /// Retired for age or by force.
    Expired,
    /// Warm-up failed.
    Failed,
}

/// A session handed to a caller by [`SessionPool::claim`].
#[derive(Clone)]
pub struct ClaimedSession {
    /// Pool session id.
    pub id: SessionId,
    /// Shared handle to the agent.
    pub handle: Arc<dyn AgentSession>,
    /// Id reported by the agent.
    pub external_id: Option<String>,
}

impl std::fmt::Debug for ClaimedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimedSession")
            .field("id", &self.id)
            .field("external_id", &self.external_id)
            .finish_non_exhaustive()
    }
}

struct SessionSlot {
    id: SessionId,
    handle: Option<Arc<dyn AgentSession>>,
    status: SessionStatus,
    created_at: Instant,
    created_at_ms: u128,
    claimed_at: Option<Instant>,
    last_used_at: Instant,
    external_id: Option<String>,
    owner: Option<String>,
}

impl SessionSlot {
    fn warming(id: SessionId) -> Self {
        let now = Instant::now();
        Self {
            id,
            handle: None,
            status: SessionStatus::Warming,
            created_at: now,
            created_at_ms: now_ms(),
            claimed_at: None,
            last_used_at: now,
            external_id: None,
            owner: None,
        }
    }

    fn info(&self, now: Instant) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            external_session_id: self.external_id.clone(),
            status: self.status,
            age: u64::try_from(now.duration_since(self.created_at).as_millis()).unwrap_or(u64::MAX),
            created_at: self.created_at_ms,
        }
    }

    fn claimed(&self) -> Option<ClaimedSession> {
        self.handle.as_ref().map(|handle| ClaimedSession {
            id: self.id.clone(),
            handle: Arc::clone(handle),
            external_id: self.external_id.clone(),
        })
    }
}

#[derive(Default)]
struct PoolState {
    sessions: HashMap<SessionId, SessionSlot>,
    consecutive_failures: u32,
    next_launch_at: Option<Instant>,
    degraded: bool,
    rearmed: bool,
    shut_down: bool,
}

impl PoolState {
    fn count(&self, status: SessionStatus) -> usize {
        self.sessions.values().filter(|s| s.status == status).count()
    }

    fn pending_launches(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.status == SessionStatus::Warming && s.handle.is_none())
            .count()
    }

    fn live(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| {
                matches!(
                    s.status,
                    SessionStatus::Warming | SessionStatus::Ready | SessionStatus::Claimed
                )
            })
            .count()
    }
}

/// Pool of pre-warmed agent sessions.
pub struct SessionPool {
    config: PoolConfig,
    launcher: Arc<dyn SessionLauncher>,
    state: Mutex<PoolState>,
    wake: Notify,
    status_tx: watch::Sender<PreWarmStatus>,
    events: Option<Arc<EventBus>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SessionPool {
    /// Create a pool. Call [`SessionPool::start`] to begin warming.
    pub fn new(config: PoolConfig, launcher: Arc<dyn SessionLauncher>) -> Self {
        let (status_tx, _) = watch::channel(PreWarmStatus {
            status: WarmPhase::Idle,
            session_id: None,
            timestamp: now_ms(),
            error: None,
        });
        Self {
            config,
            launcher,
            state: Mutex::new(PoolState::default()),
            wake: Notify::new(),
            status_tx,
            events: None,
            worker: Mutex::new(None),
        }
    }

    /// Publish lifecycle events (`prewarm.*`) to `events`.
    #[must_use]
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Pool configuration.
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Spawn the background warm-up and sweep loop. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        tracing::info!(
            pool_size = self.config.pool_size,
            max_session_age_ms = self.config.max_session_age_ms,
            cleanup_interval_ms = self.config.cleanup_interval_ms,
            "session pool starting"
        );
        *worker = Some(tokio::spawn(Arc::clone(self).run()));
    }

    async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.cleanup_interval());
        ticker.tick().await;
        loop {
            self.fill();
            let retry_at = self.state.lock().next_launch_at;
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                () = self.wake.notified() => {}
                () = sleep_until_opt(retry_at) => {}
            }
        }
    }

    /// Launch sessions until `warming + ready + claimed == pool_size`,
    /// unless backing off or degraded. A re-armed pool launches one session
    /// at a time until a launch succeeds.
    fn fill(self: &Arc<Self>) {
        let launches: Vec<SessionId> = {
            let mut state = self.state.lock();
            if state.shut_down || state.degraded {
                return;
            }
            if let Some(at) = state.next_launch_at {
                if Instant::now() < at {
                    return;
                }
                state.next_launch_at = None;
            }
            let mut missing = self.config.pool_size.saturating_sub(state.live());
            if state.rearmed {
                missing = if state.pending_launches() == 0 { missing.min(1) } else { 0 };
            }
            (0..missing)
                .map(|_| {
                    let id = Uuid::new_v4().to_string();
                    state
                        .sessions
                        .insert(id.clone(), SessionSlot::warming(id.clone()));
                    id
                })
                .collect()
        };

        for id in launches {
            tracing::debug!(session_id = %id, "launching pre-warmed session");
            self.set_status(WarmPhase::Warming, Some(&id), None);
            self.emit("prewarm.warming", &id, json!({ "sessionId": id }));
            tokio::spawn(Arc::clone(self).launch_into(id));
        }
    }

    async fn launch_into(self: Arc<Self>, id: SessionId) {
        let timeout = self.config.warmup_timeout();
        let outcome = match tokio::time::timeout(timeout, self.launcher.launch()).await {
            Ok(Ok(handle)) => Ok(handle),
            Ok(Err(e)) => Err(PoolError::LaunchFailed(e)),
            Err(_) => Err(PoolError::WarmupTimeout(timeout)),
        };

        match outcome {
            Ok(handle) => {
                let accepted = {
                    let mut state = self.state.lock();
                    let accepted = match state.sessions.get_mut(&id) {
                        Some(slot) if slot.status == SessionStatus::Warming && slot.handle.is_none() => {
                            slot.external_id = handle.external_id();
                            slot.handle = Some(Arc::clone(&handle));
                            slot.status = SessionStatus::Ready;
                            true
                        }
                        _ => false,
                    };
                    if accepted {
                        state.consecutive_failures = 0;
                        state.degraded = false;
                        state.rearmed = false;
                        state.next_launch_at = None;
                    }
                    accepted
                };
                if accepted {
                    tracing::info!(session_id = %id, pid = ?handle.pid(), "pre-warmed session ready");
                    self.set_status(WarmPhase::Ready, Some(&id), None);
                    self.emit("prewarm.ready", &id, json!({ "sessionId": id }));
                    self.wake.notify_one();
                } else {
                    tracing::debug!(session_id = %id, "slot gone before launch finished; discarding session");
                    handle.terminate().await;
                }
            }
            Err(e) => {
                let degraded = {
                    let mut state = self.state.lock();
                    state.sessions.remove(&id);
                    state.consecutive_failures += 1;
                    state.rearmed = false;
                    if state.consecutive_failures >= self.config.max_launch_attempts {
                        // Stay idle until the next sweep re-arms an attempt.
                        state.degraded = true;
                        state.next_launch_at = None;
                    } else {
                        let backoff = self.config.launch_backoff(state.consecutive_failures - 1);
                        state.next_launch_at = Some(Instant::now() + backoff);
                    }
                    state.degraded
                };
                tracing::warn!(session_id = %id, error = %e, degraded, "pre-warm launch failed");
                self.set_status(WarmPhase::Failed, Some(&id), Some(e.to_string()));
                self.emit(
                    "prewarm.failed",
                    &id,
                    json!({ "sessionId": id, "error": e.to_string(), "degraded": degraded }),
                );
                self.wake.notify_one();
            }
        }
    }

    /// Claim the oldest READY session. Never waits.
    ///
    /// # Errors
    ///
    /// [`PoolError::PoolExhausted`] when nothing is ready; callers fall back
    /// to launching a session outside the pool.
    pub fn claim(&self) -> Result<ClaimedSession, PoolError> {
        self.claim_as(None)
    }

    /// Claim the oldest READY session on behalf of `owner`.
    ///
    /// # Errors
    ///
    /// See [`SessionPool::claim`].
    pub fn claim_for(&self, owner: &str) -> Result<ClaimedSession, PoolError> {
        self.claim_as(Some(owner))
    }

    fn claim_as(&self, owner: Option<&str>) -> Result<ClaimedSession, PoolError> {
        let claimed = {
            let mut state = self.state.lock();
            if state.shut_down {
                return Err(PoolError::ShutDown);
            }
            let oldest = state
                .sessions
                .values()
                .filter(|s| s.status == SessionStatus::Ready && s.handle.is_some())
                .min_by_key(|s| s.created_at)
                .map(|s| s.id.clone());
            let Some(slot) = oldest.and_then(|id| state.sessions.get_mut(&id)) else {
                return Err(PoolError::PoolExhausted);
            };
            let now = Instant::now();
            slot.status = SessionStatus::Claimed;
            slot.claimed_at = Some(now);
            slot.last_used_at = now;
            slot.owner = owner.map(str::to_owned);
            slot.claimed().ok_or(PoolError::PoolExhausted)?
        };
        tracing::info!(session_id = %claimed.id, owner = ?owner, "session claimed");
        self.emit("prewarm.claimed", &claimed.id, json!({ "sessionId": claimed.id, "owner": owner }));
        Ok(claimed)
    }

    /// Return a claimed session. It is re-warmed and put back into rotation
    /// if younger than `max_session_age`, otherwise expired.
    ///
    /// # Errors
    ///
    /// [`PoolError::UnknownSession`] or [`PoolError::NotClaimed`].
    pub fn release(self: &Arc<Self>, id: &str) -> Result<SessionStatus, PoolError> {
        self.release_checked(id, |_| true)
    }

    /// Return a session claimed by `owner` (`None` matches an unowned claim).
    ///
    /// # Errors
    ///
    /// [`PoolError::UnknownSession`], or [`PoolError::NotClaimed`] when the
    /// session is not claimed or is claimed by someone else.
    pub fn release_for(
        self: &Arc<Self>,
        id: &str,
        owner: Option<&str>,
    ) -> Result<SessionStatus, PoolError> {
        self.release_checked(id, |slot| slot.owner.as_deref() == owner)
    }

    fn release_checked(
        self: &Arc<Self>,
        id: &str,
        may_release: impl Fn(&SessionSlot) -> bool,
    ) -> Result<SessionStatus, PoolError> {
        let (handle, next) = {
            let mut state = self.state.lock();
            let slot = state
                .sessions
                .get_mut(id)
                .ok_or_else(|| PoolError::UnknownSession(id.to_owned()))?;
            if slot.status != SessionStatus::Claimed || !may_release(slot) {
                return Err(PoolError::NotClaimed(id.to_owned()));
            }
            slot.owner = None;
            slot.claimed_at = None;
            slot.last_used_at = Instant::now();
            let handle = slot.handle.clone();
            if handle.is_some() && slot.created_at.elapsed() < self.config.max_session_age() {
                slot.status = SessionStatus::Warming;
                (handle, SessionStatus::Warming)
            } else {
                state.sessions.remove(id);
                (handle, SessionStatus::Expired)
            }
        };

        match (next, handle) {
            (SessionStatus::Warming, Some(handle)) => {
                tracing::info!(session_id = %id, "session released; re-warming");
                self.set_status(WarmPhase::Warming, Some(id), None);
                self.emit("prewarm.released", id, json!({ "sessionId": id, "next": next }));
                tokio::spawn(Arc::clone(self).rewarm(id.to_owned(), handle));
            }
            (_, handle) => {
                tracing::info!(session_id = %id, "session released past max age; expiring");
                self.emit("prewarm.expired", id, json!({ "sessionId": id, "reason": "age" }));
                terminate_later(handle);
                self.wake.notify_one();
            }
        }
        Ok(next)
    }

    async fn rewarm(self: Arc<Self>, id: SessionId, handle: Arc<dyn AgentSession>) {
        let timeout = self.config.warmup_timeout();
        let error = match tokio::time::timeout(timeout, handle.reset()).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(PoolError::LaunchFailed(e)),
            Err(_) => Some(PoolError::WarmupTimeout(timeout)),
        };

        let Some(error) = error else {
            let ready = {
                let mut state = self.state.lock();
                match state.sessions.get_mut(&id) {
                    Some(slot) if slot.status == SessionStatus::Warming => {
                        slot.status = SessionStatus::Ready;
                        true
                    }
                    _ => false,
                }
            };
            if ready {
                tracing::debug!(session_id = %id, "session back in rotation");
                self.set_status(WarmPhase::Ready, Some(&id), None);
                self.emit("prewarm.ready", &id, json!({ "sessionId": id, "rewarmed": true }));
            }
            return;
        };

        let removed = {
            let mut state = self.state.lock();
            matches!(
                state.sessions.get(&id).map(|s| s.status),
                Some(SessionStatus::Warming)
            ) && state.sessions.remove(&id).is_some()
        };
        if removed {
            tracing::warn!(session_id = %id, error = %error, "re-warm failed; dropping session");
            self.set_status(WarmPhase::Failed, Some(&id), Some(error.to_string()));
            self.emit("prewarm.failed", &id, json!({ "sessionId": id, "error": error.to_string() }));
            handle.terminate().await;
            self.wake.notify_one();
        }
    }

    /// Force-expire a session in any live state and tear it down.
    ///
    /// # Errors
    ///
    /// [`PoolError::UnknownSession`] if the id is not tracked.
    pub fn expire(&self, id: &str) -> Result<(), PoolError> {
        let slot = self
            .state
            .lock()
            .sessions
            .remove(id)
            .ok_or_else(|| PoolError::UnknownSession(id.to_owned()))?;
        tracing::info!(session_id = %id, previous = ?slot.status, "session force-expired");
        self.emit("prewarm.expired", id, json!({ "sessionId": id, "reason": "forced" }));
        terminate_later(slot.handle);
        self.wake.notify_one();
        Ok(())
    }

    /// Evict WARMING/READY sessions older than `max_session_age` and CLAIMED
    /// sessions idle for longer than `max_session_age`.
    /// Runs every `cleanup_interval`; returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let max_age = self.config.max_session_age();
        let evicted: Vec<SessionSlot> = {
            let mut state = self.state.lock();
            let stale: Vec<SessionId> = state
                .sessions
                .values()
                .filter(|s| match s.status {
                    SessionStatus::Warming | SessionStatus::Ready => s.created_at.elapsed() > max_age,
                    SessionStatus::Claimed => s.last_used_at.elapsed() > max_age,
                    SessionStatus::Expired | SessionStatus::Failed => false,
                })
                .map(|s| s.id.clone())
                .collect();
            if state.degraded {
                state.degraded = false;
                state.rearmed = true;
                state.consecutive_failures = self.config.max_launch_attempts.saturating_sub(1);
                state.next_launch_at = None;
                tracing::info!("degraded pool re-armed for another launch attempt");
            }
            stale
                .iter()
                .filter_map(|id| state.sessions.remove(id))
                .collect()
        };

        let count = evicted.len();
        for slot in evicted {
            let reason = if slot.status == SessionStatus::Claimed { "idle" } else { "age" };
            tracing::info!(session_id = %slot.id, reason, "evicting session");
            self.emit("prewarm.expired", &slot.id, json!({ "sessionId": slot.id, "reason": reason }));
            terminate_later(slot.handle);
        }
        if count > 0 {
            self.wake.notify_one();
        }
        count
    }

    /// Record activity on a session.
    pub fn touch(&self, id: &str) -> bool {
        self.state.lock().sessions.get_mut(id).is_some_and(|slot| {
            slot.last_used_at = Instant::now();
            true
        })
    }

    /// The session if it is CLAIMED by `owner` (`None` matches an unowned claim).
    pub fn claimed_session(&self, id: &str, owner: Option<&str>) -> Option<ClaimedSession> {
        let state = self.state.lock();
        state
            .sessions
            .get(id)
            .filter(|slot| slot.status == SessionStatus::Claimed && slot.owner.as_deref() == owner)
            .and_then(SessionSlot::claimed)
    }

    /// Listing row for one session.
    pub fn session_info(&self, id: &str) -> Option<SessionInfo> {
        let now = Instant::now();
        self.state.lock().sessions.get(id).map(|slot| slot.info(now))
    }

    /// Current warm-up status.
    pub fn status(&self) -> PreWarmStatus {
        self.status_tx.borrow().clone()
    }

    /// Stream of status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<PreWarmStatus> {
        self.status_tx.subscribe()
    }

    /// Metrics snapshot.
    pub fn metrics(&self) -> PreWarmMetrics {
        let now = Instant::now();
        let state = self.state.lock();
        let warming = state.count(SessionStatus::Warming);
        let current = PoolCounts {
            total: state.sessions.len(),
            ready: state.count(SessionStatus::Ready),
            warming,
            claimed: state.count(SessionStatus::Claimed),
            is_warming: warming > 0,
            degraded: state.degraded,
        };
        let mut rows: Vec<&SessionSlot> = state.sessions.values().collect();
        rows.sort_by_key(|slot| slot.created_at);
        PreWarmMetrics {
            configured: ConfiguredPool {
                pool_size: self.config.pool_size,
                max_session_age: self.config.max_session_age_ms,
                cleanup_interval: self.config.cleanup_interval_ms,
                warmup_timeout: self.config.warmup_timeout_ms,
            },
            current,
            sessions: rows.into_iter().map(|slot| slot.info(now)).collect(),
        }
    }

    /// Stop the background loop and terminate every session.
    pub async fn shutdown(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
        let slots: Vec<SessionSlot> = {
            let mut state = self.state.lock();
            state.shut_down = true;
            state.sessions.drain().map(|(_, slot)| slot).collect()
        };
        tracing::info!(sessions = slots.len(), "session pool shutting down");
        for slot in slots {
            if let Some(handle) = slot.handle {
                handle.terminate().await;
            }
        }
        self.set_status(WarmPhase::Stopped, None, None);
    }

    fn set_status(&self, status: WarmPhase, session_id: Option<&str>, error: Option<String>) {
        self.status_tx.send_replace(PreWarmStatus {
            status,
            session_id: session_id.map(str::to_owned),
            timestamp: now_ms(),
            error,
        });
    }

    fn emit(&self, event_type: &str, session_id: &str, payload: serde_json::Value) {
        if let Some(events) = &self.events {
            events.emit(event_type, Some(session_id), payload);
        }
    }
}

fn terminate_later(handle: Option<Arc<dyn AgentSession>>) {
    if let Some(handle) = handle {
        tokio::spawn(async move { handle.terminate().await });
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at.into()).await,
        None => pending().await,
    }
}
