//! API-facing request/response models.
//!
//! These are plain values; a transport adapter (GraphQL, REST, IPC)
//! serializes them as-is. Field names serialize in camelCase.

use serde::{Deserialize, Serialize};

use crate::core::SessionStatus;

/// Current warm-up activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmPhase {
    /// Nothing launched yet.
    Idle,
    /// A session is being launched or re-warmed.
    Warming,
    /// The most recent warm-up finished.
    Ready,
    /// The most recent warm-up failed.
    Failed,
    /// The pool has been shut down.
    Stopped,
}

/// Status value mirrored by the status-change stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreWarmStatus {
    /// Warm-up phase.
    pub status: WarmPhase,
    /// Session the status refers to.
    pub session_id: Option<String>,
    /// When the status was set (ms since epoch).
    pub timestamp: u128,
    /// Failure detail for [`WarmPhase::Failed`].
    pub error: Option<String>,
}

/// Configured pool limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfiguredPool {
    /// Target number of sessions.
    pub pool_size: usize,
    /// Maximum session age (ms).
    pub max_session_age: u64,
    /// Sweep period (ms).
    pub cleanup_interval: u64,
    /// Warm-up deadline (ms).
    pub warmup_timeout: u64,
}

/// Live slot counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolCounts {
    /// Sessions in any live state.
    pub total: usize,
    /// Sessions ready to claim.
    pub ready: usize,
    /// Sessions launching or re-warming.
    pub warming: usize,
    /// Sessions owned by a caller.
    pub claimed: usize,
    /// Whether any warm-up is in flight.
    pub is_warming: bool,
    /// Whether repeated launch failures have paused refilling.
    pub degraded: bool,
}

/// One row of the per-session listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Pool session id.
    pub session_id: String,
    /// Id reported by the agent, once known.
    pub external_session_id: Option<String>,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// Age in milliseconds.
    pub age: u64,
    /// Creation time (ms since epoch).
    pub created_at: u128,
}

/// Pool metrics snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreWarmMetrics {
    /// Configured limits.
    pub configured: ConfiguredPool,
    /// Live counts.
    pub current: PoolCounts,
    /// Per-session rows, oldest first.
    pub sessions: Vec<SessionInfo>,
}

/// Result of claiming a pre-warmed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    /// Whether a session was claimed.
    pub success: bool,
    /// Claimed session id.
    pub session_id: Option<String>,
    /// Session status after the claim.
    pub status: Option<SessionStatus>,
    /// Why the claim failed.
    pub error: Option<String>,
}

/// Command execution request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteCommandRequest {
    /// Session to reuse, if the caller already holds one.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Prompt sent to the agent.
    pub prompt: String,
    /// Identity of the caller, used for claim ownership.
    #[serde(default)]
    pub caller: Option<String>,
}

impl ExecuteCommandRequest {
    /// Request without a session or caller.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            session_id: None,
            prompt: prompt.into(),
            caller: None,
        }
    }

    /// Reuse `session_id`.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attribute the request to `caller`.
    #[must_use]
    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }
}

/// Where the session serving a command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSource {
    /// A session the caller already held.
    Reused,
    /// Freshly claimed from the pre-warmed pool.
    Pool,
    /// Launched on demand because the pool was empty.
    AdHoc,
}

/// Execution metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMetadata {
    /// Start time (ms since epoch).
    pub start_time: u128,
    /// OS process id of the session, if known.
    pub pid: Option<u32>,
    /// Session origin.
    pub source: Option<SessionSource>,
    /// Correlation id shared by the command's events.
    pub correlation_id: String,
}

/// Command execution result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteCommandResponse {
    /// Session that served the command.
    pub session_id: Option<String>,
    /// Whether the command completed.
    pub success: bool,
    /// Failure detail.
    pub error: Option<String>,
    /// Agent output for the prompt.
    pub initial_response: Option<String>,
    /// Timing and origin details.
    pub metadata: CommandMetadata,
}

/// Health response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
    /// Pool is running under capacity after repeated launch failures.
    pub degraded: bool,
}

/// Derive a health payload from a metrics snapshot.
pub const fn health(metrics: &PreWarmMetrics) -> Health {
    Health {
        ok: !metrics.current.degraded,
        degraded: metrics.current.degraded,
    }
}
