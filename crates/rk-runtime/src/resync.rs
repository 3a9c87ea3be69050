use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::error;
use uuid::Uuid;

/// Why a full resync ran.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResyncTrigger {
    /// Initial load; the process boots invalid.
    Startup,
    MissedMessages,
    StaleStream,
    /// The gate found the store refusing writes.
    ApplyFailure,
    /// Operator invalidated the replica.
    Manual,
}

impl ResyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResyncTrigger::Startup => "startup",
            ResyncTrigger::MissedMessages => "missed_messages",
            ResyncTrigger::StaleStream => "stale_stream",
            ResyncTrigger::ApplyFailure => "apply_failure",
            ResyncTrigger::Manual => "manual",
        }
    }
}

impl fmt::Display for ResyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    pub resync_id: Uuid,
    pub trigger: ResyncTrigger,
    /// Attempts including the successful one.
    pub attempts: u32,
    pub records_loaded: usize,
    /// Buffered records replayed on top of the snapshot.
    pub replayed: usize,
    pub snapshot_as_of: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Run `op` until it succeeds, sleeping `backoff` after each failure.
///
/// Unbounded: there is no attempt cap and no cancellation. `op` receives the
/// 1-based attempt number. Returns the value and the number of attempts made.
pub async fn retry_until_ok<T, F, Fut>(op_name: &str, backoff: Duration, mut op: F) -> (T, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt: u32 = 1;
    loop {
        match op(attempt).await {
            Ok(v) => return (v, attempt),
            Err(e) => {
                error!(
                    op = op_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %format!("{e:#}"),
                    "attempt failed; retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}
