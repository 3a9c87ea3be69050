//! In-process scenario tests for rk-daemon HTTP endpoints.
//!
//! The Axum router is driven via `tower::ServiceExt::oneshot`; no socket is bound.
//!
//! GREEN when:
//! - `/v1/health` answers `{ok, service, version}`.
//! - `/v1/status` reflects validity, tracker and store state of the shared context.
//! - `/v1/sync/invalidate` invalidates a valid replica with reason `manual` and
//!   is a no-op on an already-invalid one.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use rk_daemon::{routes, state};
use rk_runtime::{ManualClock, MetadataDecoder, StreamEventProcessor, SyncContext};
use rk_schemas::StreamEvent;
use rk_store::MemoryStore;
use tower::ServiceExt; // oneshot

fn make_ctx() -> Arc<SyncContext> {
    let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
    Arc::new(SyncContext::new(Arc::new(MemoryStore::new()), clock, 10_000))
}

fn make_router(ctx: Arc<SyncContext>) -> axum::Router {
    routes::build_router(Arc::new(state::AppState::new(ctx)))
}

async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

fn get(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

fn post(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

fn event(key: &str, seq: i64) -> StreamEvent {
    StreamEvent::new("b")
        .with_meta("record_key", key)
        .with_meta("sequence_id", seq.to_string())
}

#[tokio::test]
async fn health_returns_200_ok_true() {
    let (status, body) = call(make_router(make_ctx()), get("/v1/health")).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "rk-daemon");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn status_at_boot_is_invalid_and_empty() {
    let (status, body) = call(make_router(make_ctx()), get("/v1/status")).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["valid"], false);
    assert_eq!(json["invalid_reason"], "boot_default");
    assert!(json["last_seen"].is_null());
    assert_eq!(json["gap_count"], 0);
    assert_eq!(json["records"], 0);
    assert_eq!(json["resync_in_flight"], false);
    assert!(json["daemon_uptime_secs"].is_u64());
    assert_eq!(json["counters"]["received"], 0);
}

#[tokio::test]
async fn status_reflects_processed_events() {
    let ctx = make_ctx();
    ctx.gate().revalidate_after_resync().unwrap();
    let processor = StreamEventProcessor::new(ctx.clone(), Arc::new(MetadataDecoder::default()));
    processor.handle(&event("A", 1));
    processor.handle(&event("B", 4));

    let (_, body) = call(make_router(ctx), get("/v1/status")).await;
    let json = parse_json(body);
    assert_eq!(json["valid"], true);
    assert!(json["invalid_reason"].is_null());
    assert_eq!(json["last_seen"], 4);
    assert_eq!(json["gap_count"], 2);
    assert_eq!(json["records"], 2);
    assert_eq!(json["counters"]["received"], 2);
    assert_eq!(json["counters"]["applied"], 2);
    assert!(json["last_received_at"].is_string());
}

#[tokio::test]
async fn invalidate_forces_manual_reason() {
    let ctx = make_ctx();
    ctx.gate().revalidate_after_resync().unwrap();

    let (status, body) = call(make_router(ctx.clone()), post("/v1/sync/invalidate")).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["invalidated"], true);
    assert_eq!(json["status"]["valid"], false);
    assert_eq!(json["status"]["invalid_reason"], "manual");
    assert!(!ctx.gate().is_valid());
}

#[tokio::test]
async fn invalidate_on_invalid_replica_is_a_noop() {
    let ctx = make_ctx();
    let (_, body) = call(make_router(ctx), post("/v1/sync/invalidate")).await;
    let json = parse_json(body);
    assert_eq!(json["invalidated"], false);
    assert_eq!(json["status"]["invalid_reason"], "boot_default");
}

#[tokio::test]
async fn invalidate_requires_post() {
    let (status, _) = call(make_router(make_ctx()), get("/v1/sync/invalidate")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let (status, _) = call(make_router(make_ctx()), get("/v1/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
