//! Axum router and HTTP handlers for rk-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use rk_integrity::InvalidReason;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::{
    api_types::{HealthResponse, InvalidateResponse},
    state::{AppState, BusMsg},
};

/// Build the application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here so tests can use
/// the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route("/v1/sync/invalidate", post(sync_invalidate))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let snap = st.status();
    let _ = st.bus.send(BusMsg::Status(snap.clone()));
    (StatusCode::OK, Json(snap))
}

// ---------------------------------------------------------------------------
// POST /v1/sync/invalidate
// ---------------------------------------------------------------------------

/// Operator-forced resync. The controller picks it up on its next tick.
pub(crate) async fn sync_invalidate(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let invalidated = st.sync.gate().invalidate(InvalidReason::Manual);
    if invalidated {
        warn!("sync/invalidate: replica invalidated by operator");
        let _ = st.bus.send(BusMsg::LogLine {
            level: "WARN".to_string(),
            msg: "replica invalidated by operator; resync pending".to_string(),
        });
    } else {
        info!("sync/invalidate: replica already invalid");
    }

    (
        StatusCode::OK,
        Json(InvalidateResponse {
            invalidated,
            status: st.status(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let events = bus_events(st.bus.subscribe());
    let sse = Sse::new(events).keep_alive(KeepAlive::new());
    ([(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"))], sse).into_response()
}

/// Lagged receivers skip what they missed; the next status event catches them up.
fn bus_events(rx: broadcast::Receiver<BusMsg>) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|item| async move {
        let msg = item.ok()?;
        let event = Event::default().event(msg.event_name()).json_data(&msg).ok()?;
        Some(Ok(event))
    })
}
