//! Scenario: forward jump opens gaps, late arrival resolves one
//!
//! GREEN when:
//! - observe 5 then 8 leaves {6, 7} missed at threshold zero.
//! - a late 6 resolves only 6; 7 stays tracked.
//! - expire at a threshold the remaining gap has not reached keeps it.

use chrono::{DateTime, TimeZone, Utc};
use rk_integrity::*;
use rk_schemas::SequenceId;
use std::time::Duration;

fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn missed(tr: &SequenceGapTracker, thr: Duration, now: DateTime<Utc>) -> Vec<i64> {
    tr.missed_ids(thr, now).iter().map(|g| g.id.get()).collect()
}

#[test]
fn scenario_gap_opened_then_partially_resolved() {
    let tr = SequenceGapTracker::new();

    tr.observe(SequenceId(5), t(0));
    tr.observe(SequenceId(8), t(0));
    assert_eq!(missed(&tr, Duration::ZERO, t(0)), vec![6, 7]);

    assert_eq!(tr.observe(SequenceId(6), t(1)), Observation::LateArrival);
    assert_eq!(missed(&tr, Duration::ZERO, t(1)), vec![7]);

    // Not yet matured at a 60s threshold: expire keeps it.
    assert_eq!(tr.expire(Duration::from_secs(60), t(30)), 0);
    assert_eq!(tr.gap_count(), 1);

    assert_eq!(tr.expire(Duration::from_secs(60), t(60)), 1);
    assert_eq!(tr.gap_count(), 0);
    assert_eq!(tr.last_seen(), Some(SequenceId(8)));
}
