//! Request and response types for rk-daemon HTTP endpoints.
//!
//! No business logic lives here.

use rk_runtime::SyncStatus;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// /v1/status
// ---------------------------------------------------------------------------

/// Sync status plus process uptime. Also the payload of SSE `status` events.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub daemon_uptime_secs: u64,
    #[serde(flatten)]
    pub sync: SyncStatus,
}

// ---------------------------------------------------------------------------
// /v1/sync/invalidate
// ---------------------------------------------------------------------------

/// `invalidated` is false when the replica was already invalid; a resync is
/// then already pending or in flight.
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    pub invalidated: bool,
    pub status: StatusResponse,
}
