//! rk-testkit
//!
//! Deterministic fakes and a wiring harness for end-to-end scenarios.
//! Nothing here touches the network or the wall clock.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rk_reconcile::ValidationReport;
use rk_runtime::{
    ControllerConfig, ManualClock, MetadataDecoder, ReconciliationController, SnapshotSource,
    StreamEventProcessor, SyncContext,
};
use rk_schemas::{Record, RecordStatus, Snapshot, StreamEvent};
use rk_store::{MemoryStore, Store, StoreError};
use std::collections::VecDeque;
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Fixed epoch for scenario clocks: 2023-11-14T22:13:20Z.
pub fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .unwrap_or_default()
}

pub fn active(key: &str, payload: &str, at: DateTime<Utc>) -> Record {
    Record::new(key, RecordStatus::Active, payload, at)
}

/// Stream event in the default metadata layout.
pub fn event(key: &str, seq: Option<i64>, body: &str) -> StreamEvent {
    let ev = StreamEvent::new(body).with_meta("record_key", key);
    match seq {
        Some(s) => ev.with_meta("sequence_id", s.to_string()),
        None => ev,
    }
}

/// Snapshot fixture in the HTTP source's response layout (`{as_of, records}`).
pub fn load_snapshot_json(path: &str) -> Result<Snapshot> {
    let s = fs::read_to_string(path).with_context(|| format!("read snapshot: {path}"))?;
    let snap: Snapshot = serde_json::from_str(&s).context("parse snapshot json")?;
    Ok(snap)
}

// ---------------------------------------------------------------------------
// Scripted snapshot source
// ---------------------------------------------------------------------------

enum Step {
    Serve(Snapshot),
    Fail(String),
}

/// Serves scripted steps in order, then repeats `fallback` forever.
pub struct ScriptedSnapshotSource {
    steps: Mutex<VecDeque<Step>>,
    fallback: Mutex<Snapshot>,
    fetches: AtomicUsize,
}

impl ScriptedSnapshotSource {
    pub fn new(fallback: Snapshot) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fail_times(self, n: usize, msg: &str) -> Self {
        {
            let mut steps = self.steps.lock().unwrap_or_else(|p| p.into_inner());
            for _ in 0..n {
                steps.push_back(Step::Fail(msg.to_string()));
            }
        }
        self
    }

    pub fn then_serve(self, snapshot: Snapshot) -> Self {
        self.steps
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(Step::Serve(snapshot));
        self
    }

    pub fn set_fallback(&self, snapshot: Snapshot) {
        *self.fallback.lock().unwrap_or_else(|p| p.into_inner()) = snapshot;
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SnapshotSource for ScriptedSnapshotSource {
    fn source_name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch_snapshot(&self) -> Result<Snapshot> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        match step {
            Some(Step::Serve(s)) => Ok(s),
            Some(Step::Fail(msg)) => Err(anyhow!(msg)),
            None => Ok(self
                .fallback
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Faulty store
// ---------------------------------------------------------------------------

/// [`MemoryStore`] with switchable failures.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    fail_apply: AtomicBool,
    fail_load: AtomicBool,
    fail_diff: AtomicBool,
    fail_purge: AtomicBool,
    apply_calls: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn fail_apply(&self, on: bool) {
        self.fail_apply.store(on, Ordering::SeqCst);
    }

    pub fn fail_load(&self, on: bool) {
        self.fail_load.store(on, Ordering::SeqCst);
    }

    pub fn fail_diff(&self, on: bool) {
        self.fail_diff.store(on, Ordering::SeqCst);
    }

    pub fn fail_purge(&self, on: bool) {
        self.fail_purge.store(on, Ordering::SeqCst);
    }

    /// Direct `apply` calls (pending replay goes through `set_valid`, not here).
    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    fn injected(flag: &AtomicBool, what: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Backend(format!("injected {what} failure")))
        } else {
            Ok(())
        }
    }
}

impl Store for FaultyStore {
    fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    fn set_invalid(&self) {
        self.inner.set_invalid()
    }

    fn set_valid(&self) -> Result<usize, StoreError> {
        self.inner.set_valid()
    }

    fn apply(&self, record: Record) -> Result<(), StoreError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        Self::injected(&self.fail_apply, "apply")?;
        self.inner.apply(record)
    }

    fn buffer(&self, record: Record) {
        self.inner.buffer(record)
    }

    fn pending_len(&self) -> usize {
        self.inner.pending_len()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn load_from_snapshot(&self, records: Vec<Record>) -> Result<usize, StoreError> {
        Self::injected(&self.fail_load, "load")?;
        self.inner.load_from_snapshot(records)
    }

    fn diff_against_snapshot(&self, snapshot: &Snapshot) -> Result<ValidationReport, StoreError> {
        Self::injected(&self.fail_diff, "diff")?;
        self.inner.diff_against_snapshot(snapshot)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        Self::injected(&self.fail_purge, "purge")?;
        self.inner.purge_expired(now)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Context, processor and controller wired over a [`FaultyStore`], a
/// [`ManualClock`] and a [`ScriptedSnapshotSource`].
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<FaultyStore>,
    pub source: Arc<ScriptedSnapshotSource>,
    pub ctx: Arc<SyncContext>,
    pub processor: StreamEventProcessor,
    pub controller: ReconciliationController,
}

impl Harness {
    pub fn new(source: ScriptedSnapshotSource, cfg: ControllerConfig) -> Self {
        Self::starting_at(t(0), source, cfg)
    }

    pub fn starting_at(
        start: DateTime<Utc>,
        source: ScriptedSnapshotSource,
        cfg: ControllerConfig,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(FaultyStore::new());
        let source = Arc::new(source);
        let ctx = Arc::new(SyncContext::new(store.clone(), clock.clone(), 10_000));
        let processor =
            StreamEventProcessor::new(ctx.clone(), Arc::new(MetadataDecoder::default()));
        let controller = ReconciliationController::new(ctx.clone(), source.clone(), cfg);
        Self {
            clock,
            store,
            source,
            ctx,
            processor,
            controller,
        }
    }

    pub fn advance(&self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs));
    }
}

/// Controller config with timeouts in seconds and a 1ms resync backoff.
pub fn fast_config(missed_secs: u64, stale_secs: u64) -> ControllerConfig {
    ControllerConfig {
        tick_interval: Duration::from_millis(10),
        missed_message_timeout: Duration::from_secs(missed_secs),
        stale_message_timeout: Duration::from_secs(stale_secs),
        resync_backoff: Duration::from_millis(1),
        ..ControllerConfig::default()
    }
}
