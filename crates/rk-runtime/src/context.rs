//! Shared handle for one replicated store.
//!
//! Built once at startup and passed (as `Arc<SyncContext>`) to both the stream
//! processor and the reconciliation controller. Holds the tracker, the validity
//! gate, the clock, the timestamps silence detection reads, the resync permit
//! and the stream counters. There is no global state.

use crate::clock::{millis_to_utc, Clock};
use chrono::{DateTime, Utc};
use rk_integrity::{InvalidReason, ReplicaValidityGate, SequenceGapTracker};
use rk_schemas::SequenceId;
use rk_store::Store;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

const UNSET: i64 = i64::MIN;

/// Lock-free counters fed by the stream path and the controller.
#[derive(Debug, Default)]
pub struct SyncCounters {
    pub received: AtomicU64,
    pub unsequenced: AtomicU64,
    pub malformed: AtomicU64,
    pub applied: AtomicU64,
    pub buffered: AtomicU64,
    pub apply_failures: AtomicU64,
    pub resyncs: AtomicU64,
    pub resync_failed_attempts: AtomicU64,
    pub validations: AtomicU64,
    /// Gaps dropped by the silence trigger before its resync.
    pub expired_gaps: AtomicU64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub received: u64,
    pub unsequenced: u64,
    pub malformed: u64,
    pub applied: u64,
    pub buffered: u64,
    pub apply_failures: u64,
    pub resyncs: u64,
    pub resync_failed_attempts: u64,
    pub validations: u64,
    pub expired_gaps: u64,
}

impl SyncCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CountersSnapshot {
            received: get(&self.received),
            unsequenced: get(&self.unsequenced),
            malformed: get(&self.malformed),
            applied: get(&self.applied),
            buffered: get(&self.buffered),
            apply_failures: get(&self.apply_failures),
            resyncs: get(&self.resyncs),
            resync_failed_attempts: get(&self.resync_failed_attempts),
            validations: get(&self.validations),
            expired_gaps: get(&self.expired_gaps),
        }
    }
}

/// Point-in-time view for logs and the status route.
#[derive(Clone, Debug, Serialize)]
pub struct SyncStatus {
    pub valid: bool,
    pub invalid_reason: Option<InvalidReason>,
    pub last_seen: Option<SequenceId>,
    pub gap_count: usize,
    pub pending: usize,
    pub records: usize,
    pub resync_in_flight: bool,
    pub last_received_at: Option<DateTime<Utc>>,
    pub last_resync_at: Option<DateTime<Utc>>,
    pub counters: CountersSnapshot,
}

pub struct SyncContext {
    tracker: SequenceGapTracker,
    gate: ReplicaValidityGate,
    clock: Arc<dyn Clock>,
    started_at: DateTime<Utc>,
    last_received_ms: AtomicI64,
    last_resync_ms: AtomicI64,
    resync_in_flight: AtomicBool,
    counters: SyncCounters,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("gate", &self.gate)
            .field("last_seen", &self.tracker.last_seen())
            .field("gap_count", &self.tracker.gap_count())
            .finish_non_exhaustive()
    }
}

/// Held for the duration of one resync. Dropping it releases the permit.
#[derive(Debug)]
pub struct ResyncPermit {
    ctx: Arc<SyncContext>,
}

impl Drop for ResyncPermit {
    fn drop(&mut self) {
        self.ctx.resync_in_flight.store(false, Ordering::Release);
    }
}

impl SyncContext {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, max_gap_span: usize) -> Self {
        let started_at = clock.now();
        Self {
            tracker: SequenceGapTracker::with_max_gap_span(max_gap_span),
            gate: ReplicaValidityGate::new(store),
            clock,
            started_at,
            last_received_ms: AtomicI64::new(UNSET),
            last_resync_ms: AtomicI64::new(UNSET),
            resync_in_flight: AtomicBool::new(false),
            counters: SyncCounters::default(),
        }
    }

    pub fn tracker(&self) -> &SequenceGapTracker {
        &self.tracker
    }

    pub fn gate(&self) -> &ReplicaValidityGate {
        &self.gate
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.gate.store()
    }

    pub fn counters(&self) -> &SyncCounters {
        &self.counters
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn mark_received(&self, at: DateTime<Utc>) {
        self.last_received_ms
            .store(at.timestamp_millis(), Ordering::Release);
    }

    pub fn last_received_at(&self) -> Option<DateTime<Utc>> {
        load_ts(&self.last_received_ms)
    }

    pub fn mark_resync_completed(&self, at: DateTime<Utc>) {
        self.last_resync_ms.store(at.timestamp_millis(), Ordering::Release);
    }

    pub fn last_resync_at(&self) -> Option<DateTime<Utc>> {
        load_ts(&self.last_resync_ms)
    }

    /// Time the stream last delivered an event, or context creation when none
    /// has arrived yet. Resyncs do not move it.
    pub fn silence_baseline(&self) -> DateTime<Utc> {
        self.last_received_at().unwrap_or(self.started_at)
    }

    /// `None` when a resync is already running.
    pub fn try_begin_resync(self: &Arc<Self>) -> Option<ResyncPermit> {
        self.resync_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ResyncPermit { ctx: self.clone() })
    }

    pub fn resync_in_flight(&self) -> bool {
        self.resync_in_flight.load(Ordering::Acquire)
    }

    pub fn status(&self) -> SyncStatus {
        let state = self.gate.state();
        let store = self.store();
        SyncStatus {
            valid: state.is_valid(),
            invalid_reason: state.invalid_reason(),
            last_seen: self.tracker.last_seen(),
            gap_count: self.tracker.gap_count(),
            pending: store.pending_len(),
            records: store.len(),
            resync_in_flight: self.resync_in_flight(),
            last_received_at: self.last_received_at(),
            last_resync_at: self.last_resync_at(),
            counters: self.counters.snapshot(),
        }
    }
}

fn load_ts(slot: &AtomicI64) -> Option<DateTime<Utc>> {
    match slot.load(Ordering::Acquire) {
        UNSET => None,
        ms => millis_to_utc(ms),
    }
}
