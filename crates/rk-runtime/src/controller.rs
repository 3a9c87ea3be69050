//! Reconciliation control loop
//!
//! # Per-tick evaluation
//!
//! | gate state                 | action                                        |
//! |----------------------------|-----------------------------------------------|
//! | resync already in flight   | `Coalesced`                                   |
//! | `Invalid { ApplyFailed }`  | resync (`ApplyFailure`)                       |
//! | `Invalid { Manual }`       | resync (`Manual`)                             |
//! | `Invalid { .. }` otherwise | `Idle`                                        |
//! | `Valid`                    | first matching trigger below, else `NoAction` |
//!
//! While valid, at most one trigger fires per tick, in this order:
//!
//! 1. matured gaps (`missed_message_timeout`) → invalidate, resync
//! 2. no event for longer than `stale_message_timeout` → expire gaps of at
//!    least that age, invalidate, resync. Measured from the last event only, so
//!    a dead stream resyncs on every tick until something arrives.
//! 3. calendar-day boundary crossed in `validation_tz` → diff against a fresh
//!    snapshot, purge expired records. Never invalidates.
//!
//! A resync retries with a fixed backoff until it succeeds and blocks the tick
//! meanwhile. The stream path keeps buffering throughout. The store load and
//! the pending drain run on the blocking pool.

use crate::context::{SyncContext, SyncCounters};
use crate::resync::{retry_until_ok, ResyncReport, ResyncTrigger};
use crate::snapshot::SnapshotSource;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use rk_config::SyncSettings;
use rk_integrity::{InvalidReason, ValidityState};
use rk_reconcile::{SnapshotWatermark, StaleSnapshot};
use rk_schemas::Snapshot;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    pub tick_interval: Duration,
    pub missed_message_timeout: Duration,
    pub stale_message_timeout: Duration,
    pub resync_backoff: Duration,
    pub validation_tz: Tz,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            missed_message_timeout: Duration::from_secs(300),
            stale_message_timeout: Duration::from_secs(900),
            resync_backoff: Duration::from_secs(5),
            validation_tz: chrono_tz::UTC,
        }
    }
}

impl ControllerConfig {
    pub fn from_settings(s: &SyncSettings) -> Result<Self> {
        Ok(Self {
            tick_interval: s.tick_interval(),
            missed_message_timeout: s.missed_message_timeout(),
            stale_message_timeout: s.stale_message_timeout(),
            resync_backoff: s.resync_backoff(),
            validation_tz: s.timezone()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Invalid for a reason some other path will repair (boot, an in-progress resync).
    Idle,
    NoAction,
    Resynced(ResyncReport),
    /// Scheduled validation ran. `None` means that step was skipped or failed.
    Validated {
        mismatches: Option<usize>,
        purged: Option<usize>,
    },
    /// Another resync held the permit.
    Coalesced,
}

struct AttemptOk {
    records_loaded: usize,
    replayed: usize,
    snapshot_as_of: DateTime<Utc>,
}

pub struct ReconciliationController {
    ctx: Arc<SyncContext>,
    source: Arc<dyn SnapshotSource>,
    cfg: ControllerConfig,
    watermark: Arc<Mutex<SnapshotWatermark>>,
    last_validation_date: NaiveDate,
}

impl ReconciliationController {
    pub fn new(ctx: Arc<SyncContext>, source: Arc<dyn SnapshotSource>, cfg: ControllerConfig) -> Self {
        let last_validation_date = ctx.now().with_timezone(&cfg.validation_tz).date_naive();
        Self {
            ctx,
            source,
            cfg,
            watermark: Arc::new(Mutex::new(SnapshotWatermark::new())),
            last_validation_date,
        }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.cfg
    }

    /// `as_of` of the last snapshot loaded by a resync.
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .last_accepted()
    }

    /// Initial resync, then tick on `tick_interval` until `shutdown` flips to
    /// `true` (or its sender is dropped). An in-flight resync is not cancelled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            tick_interval_secs = self.cfg.tick_interval.as_secs(),
            missed_message_timeout_secs = self.cfg.missed_message_timeout.as_secs(),
            stale_message_timeout_secs = self.cfg.stale_message_timeout.as_secs(),
            validation_tz = %self.cfg.validation_tz,
            "reconciliation controller starting"
        );
        self.resync_now(ResyncTrigger::Startup).await;

        let mut ticker = tokio::time::interval(self.cfg.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first interval tick completes immediately; the startup resync covered it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.tick().await;
                    debug!(?outcome, "controller tick");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("reconciliation controller stopped");
    }

    pub async fn tick(&mut self) -> TickOutcome {
        if self.ctx.resync_in_flight() {
            return TickOutcome::Coalesced;
        }

        match self.ctx.gate().state() {
            ValidityState::Invalid {
                reason: InvalidReason::ApplyFailed,
            } => return self.resync_now(ResyncTrigger::ApplyFailure).await,
            ValidityState::Invalid {
                reason: InvalidReason::Manual,
            } => return self.resync_now(ResyncTrigger::Manual).await,
            ValidityState::Invalid { .. } => return TickOutcome::Idle,
            ValidityState::Valid => {}
        }

        let now = self.ctx.now();

        let missed = self
            .ctx
            .tracker()
            .missed_ids(self.cfg.missed_message_timeout, now);
        if !missed.is_empty() {
            let ids: Vec<i64> = missed.iter().take(20).map(|g| g.id.get()).collect();
            warn!(
                gaps = missed.len(),
                ids = ?ids,
                threshold_secs = self.cfg.missed_message_timeout.as_secs(),
                "missed messages; forcing resync"
            );
            self.ctx.gate().invalidate(InvalidReason::MissedMessages);
            return self.resync_now(ResyncTrigger::MissedMessages).await;
        }

        let silent_for = (now - self.ctx.silence_baseline())
            .to_std()
            .unwrap_or(Duration::ZERO);
        if silent_for > self.cfg.stale_message_timeout {
            let expired = self
                .ctx
                .tracker()
                .expire(self.cfg.stale_message_timeout, now);
            SyncCounters::add(&self.ctx.counters().expired_gaps, expired as u64);
            warn!(
                silent_secs = silent_for.as_secs(),
                threshold_secs = self.cfg.stale_message_timeout.as_secs(),
                expired_gaps = expired,
                "stream silent; forcing resync"
            );
            self.ctx.gate().invalidate(InvalidReason::StaleStream);
            return self.resync_now(ResyncTrigger::StaleStream).await;
        }

        let today = now.with_timezone(&self.cfg.validation_tz).date_naive();
        if today > self.last_validation_date {
            self.last_validation_date = today;
            return self.run_validation(now).await;
        }

        TickOutcome::NoAction
    }

    /// Full resync: fetch, watermark check, tracker reset, store load, revalidate.
    /// Retries from the top after any failure.
    pub async fn resync_now(&mut self, trigger: ResyncTrigger) -> TickOutcome {
        let Some(_permit) = self.ctx.try_begin_resync() else {
            debug!(trigger = %trigger, "resync already in flight; coalesced");
            return TickOutcome::Coalesced;
        };

        let resync_id = Uuid::new_v4();
        info!(resync_id = %resync_id, trigger = %trigger, "resync started");

        let (ok, attempts) = {
            let ctx = self.ctx.clone();
            let source = self.source.clone();
            let watermark = self.watermark.clone();
            retry_until_ok("resync", self.cfg.resync_backoff, move |attempt| {
                let ctx = ctx.clone();
                let source = source.clone();
                let watermark = watermark.clone();
                async move {
                    let r = attempt_resync(&ctx, source.as_ref(), &watermark).await;
                    if r.is_err() {
                        SyncCounters::bump(&ctx.counters().resync_failed_attempts);
                        debug!(resync_id = %resync_id, attempt, "resync attempt failed");
                    }
                    r
                }
            })
            .await
        };

        let completed_at = self.ctx.now();
        self.ctx.mark_resync_completed(completed_at);
        SyncCounters::bump(&self.ctx.counters().resyncs);

        let report = ResyncReport {
            resync_id,
            trigger,
            attempts,
            records_loaded: ok.records_loaded,
            replayed: ok.replayed,
            snapshot_as_of: ok.snapshot_as_of,
            completed_at,
        };
        info!(
            resync_id = %resync_id,
            trigger = %trigger,
            attempts,
            records_loaded = report.records_loaded,
            replayed = report.replayed,
            snapshot_as_of = %report.snapshot_as_of.to_rfc3339(),
            "resync completed; replica valid"
        );
        TickOutcome::Resynced(report)
    }

    async fn run_validation(&self, now: DateTime<Utc>) -> TickOutcome {
        SyncCounters::bump(&self.ctx.counters().validations);
        info!(date = %self.last_validation_date, "scheduled validation started");

        let mismatches = match self.source.fetch_snapshot().await {
            Err(e) => {
                error!(error = %format!("{e:#}"), "validation snapshot fetch failed");
                None
            }
            Ok(snapshot) => self.diff(&snapshot),
        };

        let purged = match self.ctx.store().purge_expired(now) {
            Ok(n) => {
                info!(purged = n, "expired records purged");
                Some(n)
            }
            Err(e) => {
                error!(error = %e, "purge failed");
                None
            }
        };

        TickOutcome::Validated { mismatches, purged }
    }

    fn diff(&self, snapshot: &Snapshot) -> Option<usize> {
        let freshness = self
            .watermark
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .check(snapshot);
        if let Some(stale) = StaleSnapshot::from_freshness(&freshness) {
            warn!(error = %stale, "validation skipped");
            return None;
        }

        match self.ctx.store().diff_against_snapshot(snapshot) {
            Ok(report) if report.is_consistent() => {
                info!(
                    snapshot_records = report.snapshot_records,
                    local_records = report.local_records,
                    skipped_newer_locally = report.skipped_newer_locally,
                    "validation clean"
                );
                Some(0)
            }
            Ok(report) => {
                warn!(
                    mismatches = report.mismatch_count(),
                    snapshot_records = report.snapshot_records,
                    local_records = report.local_records,
                    preview = %report.preview(10),
                    "validation found mismatches"
                );
                Some(report.mismatch_count())
            }
            Err(e) => {
                error!(error = %e, "validation diff failed");
                None
            }
        }
    }
}

async fn attempt_resync(
    ctx: &Arc<SyncContext>,
    source: &dyn SnapshotSource,
    watermark: &Mutex<SnapshotWatermark>,
) -> Result<AttemptOk> {
    let snapshot = source
        .fetch_snapshot()
        .await
        .with_context(|| format!("snapshot fetch failed (source={})", source.source_name()))?;

    // Advances only when fresh. A later failure in this attempt leaves it
    // advanced, which only refuses snapshots older than one already served.
    let freshness = watermark
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .accept(&snapshot);
    if let Some(stale) = StaleSnapshot::from_freshness(&freshness) {
        return Err(stale.into());
    }

    ctx.tracker().reset();

    let snapshot_as_of = snapshot.as_of;
    let store = ctx.store().clone();
    let records = snapshot.records;
    let records_loaded = tokio::task::spawn_blocking(move || store.load_from_snapshot(records))
        .await
        .context("snapshot load task failed")?
        .context("snapshot load failed")?;

    // The drain holds the gate's write lock for the whole replay.
    let gate_ctx = ctx.clone();
    let replayed = tokio::task::spawn_blocking(move || gate_ctx.gate().revalidate_after_resync())
        .await
        .context("pending replay task failed")?
        .context("pending replay failed")?;

    Ok(AttemptOk {
        records_loaded,
        replayed,
        snapshot_as_of,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use chrono::TimeZone;
    use rk_schemas::{Record, RecordStatus};
    use rk_store::{MemoryStore, Store};
    use std::collections::VecDeque;

    struct ScriptSource {
        script: Mutex<VecDeque<Result<Snapshot, String>>>,
        fallback: Snapshot,
    }

    impl ScriptSource {
        fn new(fallback: Snapshot) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback,
            }
        }

        fn then(self, step: Result<Snapshot, &str>) -> Self {
            self.script
                .lock()
                .unwrap()
                .push_back(step.map_err(str::to_string));
            self
        }
    }

    #[async_trait::async_trait]
    impl SnapshotSource for ScriptSource {
        fn source_name(&self) -> &'static str {
            "script"
        }

        async fn fetch_snapshot(&self) -> Result<Snapshot> {
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(s)) => Ok(s),
                Some(Err(e)) => Err(anyhow::anyhow!(e)),
                None => Ok(self.fallback.clone()),
            }
        }
    }

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
    }

    fn snapshot(as_of: DateTime<Utc>, keys: &[&str]) -> Snapshot {
        Snapshot::new(
            as_of,
            keys.iter()
                .map(|k| Record::new(*k, RecordStatus::Active, "", as_of))
                .collect(),
        )
    }

    fn fast_cfg() -> ControllerConfig {
        ControllerConfig {
            resync_backoff: Duration::from_millis(1),
            ..ControllerConfig::default()
        }
    }

    fn setup(
        start: DateTime<Utc>,
        source: ScriptSource,
        cfg: ControllerConfig,
    ) -> (ReconciliationController, Arc<ManualClock>, Arc<MemoryStore>) {
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(MemoryStore::new());
        let ctx = Arc::new(SyncContext::new(store.clone(), clock.clone(), 10_000));
        (
            ReconciliationController::new(ctx, Arc::new(source), cfg),
            clock,
            store,
        )
    }

    #[tokio::test]
    async fn tick_before_initial_load_idles() {
        let t0 = at("2024-03-01T12:00:00Z");
        let (mut c, _, _) = setup(t0, ScriptSource::new(snapshot(t0, &[])), fast_cfg());
        assert_eq!(c.tick().await, TickOutcome::Idle);
    }

    #[tokio::test]
    async fn startup_resync_loads_and_validates() {
        let t0 = at("2024-03-01T12:00:00Z");
        let src = ScriptSource::new(snapshot(t0, &["A", "B"])).then(Err("connection refused"));
        let (mut c, _, store) = setup(t0, src, fast_cfg());

        let TickOutcome::Resynced(report) = c.resync_now(ResyncTrigger::Startup).await else {
            panic!("expected resync");
        };
        assert_eq!(report.attempts, 2);
        assert_eq!(report.records_loaded, 2);
        assert_eq!(report.trigger, ResyncTrigger::Startup);
        assert!(c.context().gate().is_valid());
        assert!(store.is_valid());
        assert_eq!(c.watermark(), Some(t0));
        assert_eq!(c.context().last_resync_at(), Some(t0));
        assert_eq!(c.context().counters().snapshot().resync_failed_attempts, 1);
    }

    #[tokio::test]
    async fn overlapping_resync_is_coalesced() {
        let t0 = at("2024-03-01T12:00:00Z");
        let (mut c, _, _) = setup(t0, ScriptSource::new(snapshot(t0, &[])), fast_cfg());

        let _held = c.context().try_begin_resync().unwrap();
        assert_eq!(c.resync_now(ResyncTrigger::Manual).await, TickOutcome::Coalesced);
        assert_eq!(c.tick().await, TickOutcome::Coalesced);
    }

    #[tokio::test]
    async fn manual_invalidation_is_repaired_on_next_tick() {
        let t0 = at("2024-03-01T12:00:00Z");
        let (mut c, _, _) = setup(t0, ScriptSource::new(snapshot(t0, &["A"])), fast_cfg());
        c.resync_now(ResyncTrigger::Startup).await;

        assert!(c.context().gate().invalidate(InvalidReason::Manual));
        match c.tick().await {
            TickOutcome::Resynced(r) => assert_eq!(r.trigger, ResyncTrigger::Manual),
            other => panic!("unexpected {other:?}"),
        }
        assert!(c.context().gate().is_valid());
    }

    #[tokio::test]
    async fn validation_fires_once_per_utc_day() {
        let t0 = at("2024-03-01T23:59:00Z");
        let (mut c, clock, _) = setup(t0, ScriptSource::new(snapshot(t0, &["A"])), fast_cfg());
        c.resync_now(ResyncTrigger::Startup).await;
        assert_eq!(c.tick().await, TickOutcome::NoAction);

        clock.advance(Duration::from_secs(120));
        assert_eq!(
            c.tick().await,
            TickOutcome::Validated {
                mismatches: Some(0),
                purged: Some(0)
            }
        );
        assert!(c.context().gate().is_valid());
        assert_eq!(c.tick().await, TickOutcome::NoAction);
    }

    #[tokio::test]
    async fn validation_day_follows_configured_timezone() {
        // 22:00 in New York on Mar 1 is already Mar 2 in UTC.
        let t0 = at("2024-03-02T03:00:00Z");
        let cfg = ControllerConfig {
            validation_tz: chrono_tz::America::New_York,
            stale_message_timeout: Duration::from_secs(24 * 3600),
            ..fast_cfg()
        };
        let (mut c, clock, _) = setup(t0, ScriptSource::new(snapshot(t0, &[])), cfg);
        c.resync_now(ResyncTrigger::Startup).await;

        clock.advance(Duration::from_secs(3600));
        assert_eq!(c.tick().await, TickOutcome::NoAction);

        clock.advance(Duration::from_secs(3600));
        assert!(matches!(c.tick().await, TickOutcome::Validated { .. }));
    }

    #[tokio::test]
    async fn validation_reports_drift_without_invalidating() {
        let t0 = at("2024-03-01T23:00:00Z");
        let later = t0 + chrono::Duration::hours(2);
        let src = ScriptSource::new(snapshot(later, &["A", "B", "C"]))
            .then(Ok(snapshot(t0, &["A"])));
        let (mut c, clock, _) = setup(t0, src, fast_cfg());
        c.resync_now(ResyncTrigger::Startup).await;

        clock.set(later);
        c.context().mark_received(later);
        assert_eq!(
            c.tick().await,
            TickOutcome::Validated {
                mismatches: Some(2),
                purged: Some(0)
            }
        );
        assert!(c.context().gate().is_valid());
    }

    #[tokio::test]
    async fn stale_validation_snapshot_skips_diff() {
        let t0 = at("2024-03-01T23:00:00Z");
        let older = t0 - chrono::Duration::hours(1);
        let src = ScriptSource::new(snapshot(older, &[])).then(Ok(snapshot(t0, &["A"])));
        let (mut c, clock, _) = setup(t0, src, fast_cfg());
        c.resync_now(ResyncTrigger::Startup).await;

        clock.advance(Duration::from_secs(2 * 3600));
        c.context().mark_received(clock.now());
        assert_eq!(
            c.tick().await,
            TickOutcome::Validated {
                mismatches: None,
                purged: Some(0)
            }
        );
    }

    #[tokio::test]
    async fn missed_timeout_uses_gap_age() {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let cfg = ControllerConfig {
            missed_message_timeout: Duration::from_secs(60),
            ..fast_cfg()
        };
        let (mut c, clock, _) = setup(t0, ScriptSource::new(snapshot(t0, &[])), cfg);
        c.resync_now(ResyncTrigger::Startup).await;

        let tr = c.context().tracker();
        tr.observe(rk_schemas::SequenceId(1), clock.now());
        tr.observe(rk_schemas::SequenceId(3), clock.now());

        clock.advance(Duration::from_secs(30));
        c.context().mark_received(clock.now());
        assert_eq!(c.tick().await, TickOutcome::NoAction);

        clock.advance(Duration::from_secs(30));
        match c.tick().await {
            TickOutcome::Resynced(r) => assert_eq!(r.trigger, ResyncTrigger::MissedMessages),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(c.context().tracker().gap_count(), 0);
    }
}
