//! Snapshot monotonicity watermark
//!
//! A lagging mirror of the snapshot source can serve a snapshot older than the
//! one already loaded. Loading it would silently roll the store backwards, so the
//! resync refuses it and retries.
//!
//! # Invariants
//!
//! - **Non-decreasing**: a snapshot is accepted only if its `as_of` is ≥ the last
//!   accepted snapshot's `as_of`.
//! - **Watermark advances only on acceptance**: rejections do not move it.
//! - **Pure, no IO**: the caller decides what to do with the result.

use chrono::{DateTime, Utc};
use rk_schemas::Snapshot;

/// Result of checking a [`Snapshot`] against the watermark.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotFreshness {
    /// `as_of` is ≥ the watermark (or no snapshot was accepted yet).
    Fresh,

    /// `as_of` is strictly older than the last accepted snapshot.
    Stale {
        watermark: DateTime<Utc>,
        got: DateTime<Utc>,
    },
}

impl SnapshotFreshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, SnapshotFreshness::Fresh)
    }

    pub fn is_rejected(&self) -> bool {
        !self.is_fresh()
    }
}

/// Tracks the `as_of` of the last loaded snapshot.
///
/// Use [`check`][SnapshotWatermark::check] for a read-only comparison (validation
/// pass) and [`accept`][SnapshotWatermark::accept] when the snapshot is about to
/// replace the store's contents (resync).
#[derive(Clone, Debug, Default)]
pub struct SnapshotWatermark {
    last_accepted: Option<DateTime<Utc>>,
}

impl SnapshotWatermark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check freshness **without** advancing the watermark.
    pub fn check(&self, snap: &Snapshot) -> SnapshotFreshness {
        match self.last_accepted {
            Some(wm) if snap.as_of < wm => SnapshotFreshness::Stale {
                watermark: wm,
                got: snap.as_of,
            },
            _ => SnapshotFreshness::Fresh,
        }
    }

    /// Check freshness and advance the watermark if the snapshot is fresh.
    pub fn accept(&mut self, snap: &Snapshot) -> SnapshotFreshness {
        let result = self.check(snap);
        if result.is_fresh() {
            self.last_accepted = Some(snap.as_of);
        }
        result
    }

    pub fn last_accepted(&self) -> Option<DateTime<Utc>> {
        self.last_accepted
    }
}

/// Error raised when a snapshot fails the watermark check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaleSnapshot {
    pub watermark: DateTime<Utc>,
    pub got: DateTime<Utc>,
}

impl StaleSnapshot {
    /// `None` when `freshness` is `Fresh`.
    pub fn from_freshness(freshness: &SnapshotFreshness) -> Option<Self> {
        match freshness {
            SnapshotFreshness::Stale { watermark, got } => Some(Self {
                watermark: *watermark,
                got: *got,
            }),
            SnapshotFreshness::Fresh => None,
        }
    }

    /// How far the served snapshot trails the watermark.
    pub fn lag(&self) -> chrono::Duration {
        self.watermark - self.got
    }
}

impl std::fmt::Display for StaleSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "stale snapshot rejected: as_of={} is older than watermark={} (lag_ms={})",
            self.got.to_rfc3339(),
            self.watermark.to_rfc3339(),
            self.lag().num_milliseconds()
        )
    }
}

impl std::error::Error for StaleSnapshot {}
