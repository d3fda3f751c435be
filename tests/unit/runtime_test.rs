//! Tests for the API-facing models

use prometheus_session_pool::core::SessionStatus;
use prometheus_session_pool::runtime::{
    health, ClaimResponse, ExecuteCommandRequest, PreWarmStatus, WarmPhase,
};
use serde_json::json;

#[test]
fn test_request_deserializes_camel_case() {
    let req: ExecuteCommandRequest =
        serde_json::from_value(json!({ "sessionId": "abc", "prompt": "hi" })).unwrap();
    assert_eq!(req, ExecuteCommandRequest::new("hi").with_session("abc"));
    assert!(req.caller.is_none());
}

#[test]
fn test_claim_response_serializes_status() {
    let resp = ClaimResponse {
        success: true,
        session_id: Some("s1".into()),
        status: Some(SessionStatus::Claimed),
        error: None,
    };
    let value = serde_json::to_value(&resp).unwrap();
    assert_eq!(value["sessionId"], "s1");
    assert_eq!(value["status"], "CLAIMED");
}

#[test]
fn test_status_serializes_phase() {
    let status = PreWarmStatus {
        status: WarmPhase::Warming,
        session_id: None,
        timestamp: 1,
        error: None,
    };
    let value = serde_json::to_value(&status).unwrap();
    assert_eq!(value["status"], "warming");
    assert!(value["sessionId"].is_null());
}

#[test]
fn test_health_reflects_degraded_flag() {
    let raw = json!({
        "configured": { "poolSize": 3, "maxSessionAge": 1, "cleanupInterval": 1, "warmupTimeout": 1 },
        "current": { "total": 0, "ready": 0, "warming": 0, "claimed": 0, "isWarming": false, "degraded": true },
        "sessions": []
    });
    let metrics = serde_json::from_value(raw).unwrap();
    let h = health(&metrics);
    assert!(!h.ok);
    assert!(h.degraded);
}
