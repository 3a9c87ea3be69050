//! Shared runtime state for rk-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The sync state itself
//! lives in the [`SyncContext`]; this module only adds the SSE bus and build
//! metadata.

use std::sync::Arc;
use std::time::Duration;

use rk_runtime::SyncContext;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::api_types::StatusResponse;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Status(StatusResponse),
    LogLine { level: String, msg: String },
}

impl BusMsg {
    /// SSE `event:` field.
    pub fn event_name(&self) -> &'static str {
        match self {
            BusMsg::Heartbeat { .. } => "heartbeat",
            BusMsg::Status(_) => "status",
            BusMsg::LogLine { .. } => "log",
        }
    }
}

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub sync: Arc<SyncContext>,
}

impl AppState {
    pub fn new(sync: Arc<SyncContext>) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "rk-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            sync,
        }
    }

    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            daemon_uptime_secs: uptime_secs(),
            sync: self.sync.status(),
        }
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Emit a heartbeat, then a status event, every `interval`.
pub fn spawn_heartbeat(state: Arc<AppState>, interval: Duration) {
    // Pin the uptime origin to daemon start rather than the first status call.
    uptime_secs();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = state.bus.send(BusMsg::Heartbeat { ts_millis: ts });
            let _ = state.bus.send(BusMsg::Status(state.status()));
        }
    });
}
