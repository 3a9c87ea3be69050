use chrono::{DateTime, Utc};
use rk_schemas::{SequenceId, TrackedGap};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::warn;

/// Upper bound on gap entries a single forward jump may create.
pub const DEFAULT_MAX_GAP_SPAN: usize = 10_000;

/// What a single `observe` call did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Observation {
    /// No id had been seen since construction or the last reset.
    First,
    /// `id == last_seen + 1`.
    InOrder,
    /// Forward jump. `missing` ids were skipped; `tracked` of them were newly
    /// inserted (fewer when already tracked or when the jump exceeded the span bound).
    GapOpened { missing: u64, tracked: usize },
    /// A tracked gap was resolved by a late delivery.
    LateArrival,
    /// At or behind `last_seen` and not a tracked gap.
    Duplicate,
}

#[derive(Debug, Default)]
struct TrackerState {
    last_seen: Option<SequenceId>,
    gaps: BTreeMap<SequenceId, TrackedGap>,
}

/// Last-seen id plus the set of ids suspected missing.
///
/// Both live behind one mutex so each operation is atomic as a whole; the
/// stream path and the controller may call in concurrently.
///
/// Invariant: no tracked gap id is ≥ `last_seen`.
#[derive(Debug)]
pub struct SequenceGapTracker {
    state: Mutex<TrackerState>,
    max_gap_span: usize,
}

impl Default for SequenceGapTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceGapTracker {
    pub fn new() -> Self {
        Self::with_max_gap_span(DEFAULT_MAX_GAP_SPAN)
    }

    pub fn with_max_gap_span(max_gap_span: usize) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            max_gap_span,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one inbound id, in transport delivery order.
    pub fn observe(&self, id: SequenceId, now: DateTime<Utc>) -> Observation {
        let mut st = self.lock();

        let last = match st.last_seen {
            None => {
                st.last_seen = Some(id);
                return Observation::First;
            }
            Some(last) => last,
        };

        if st.gaps.remove(&id).is_some() {
            return Observation::LateArrival;
        }

        let delta = id.get().saturating_sub(last.get());
        if delta <= 0 {
            return Observation::Duplicate;
        }
        if delta == 1 {
            st.last_seen = Some(id);
            return Observation::InOrder;
        }

        let missing = (delta - 1) as u64;
        let span = i64::try_from(self.max_gap_span).unwrap_or(i64::MAX);
        let first_missing = last.get() + 1;
        let lo = first_missing.max(id.get().saturating_sub(span));
        if lo > first_missing {
            warn!(
                last_seen = %last,
                seq = %id,
                missing,
                tracked_from = lo,
                max_gap_span = self.max_gap_span,
                "gap wider than max_gap_span; tracking only the most recent ids"
            );
        }

        let mut tracked = 0usize;
        for k in lo..id.get() {
            let k = SequenceId(k);
            if let std::collections::btree_map::Entry::Vacant(slot) = st.gaps.entry(k) {
                slot.insert(TrackedGap::new(k, now));
                tracked += 1;
            }
        }
        st.last_seen = Some(id);

        Observation::GapOpened { missing, tracked }
    }

    /// Gaps at least `threshold` old, in id order.
    pub fn missed_ids(&self, threshold: Duration, now: DateTime<Utc>) -> Vec<TrackedGap> {
        self.lock()
            .gaps
            .values()
            .filter(|g| g.is_matured(threshold, now))
            .copied()
            .collect()
    }

    /// Drop gaps at least `threshold` old. Younger gaps are kept.
    /// Returns the number removed.
    pub fn expire(&self, threshold: Duration, now: DateTime<Utc>) -> usize {
        let mut st = self.lock();
        let before = st.gaps.len();
        st.gaps.retain(|_, g| !g.is_matured(threshold, now));
        before - st.gaps.len()
    }

    /// Forget everything. Only a full resync calls this.
    pub fn reset(&self) {
        let mut st = self.lock();
        st.last_seen = None;
        st.gaps.clear();
    }

    pub fn last_seen(&self) -> Option<SequenceId> {
        self.lock().last_seen
    }

    pub fn gap_count(&self) -> usize {
        self.lock().gaps.len()
    }

    pub fn gaps(&self) -> Vec<TrackedGap> {
        self.lock().gaps.values().copied().collect()
    }

    pub fn max_gap_span(&self) -> usize {
        self.max_gap_span
    }
}
