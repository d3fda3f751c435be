//! API surface consumed by the request-handling layer.

pub mod api;

pub use api::{
    health, ClaimResponse, CommandMetadata, ExecuteCommandRequest, ExecuteCommandResponse,
    Health, PreWarmMetrics, PreWarmStatus, SessionInfo, SessionSource, WarmPhase,
};
