//! Scenario: a sequence gap that outlives the missed-message timeout forces a resync
//!
//! GREEN when:
//! - Ids 1,2,3,7 leave {4,5,6} tracked as gaps.
//! - With a zero timeout the next tick invalidates (MissedMessages) and resyncs.
//! - After the resync the replica is valid, no gaps remain, and the tracker
//!   has no baseline (the next id starts fresh).
//! - A late arrival that fills every gap before the timeout prevents the resync.

use rk_integrity::Observation;
use rk_runtime::{HandleOutcome, ResyncTrigger, TickOutcome};
use rk_schemas::{SequenceId, Snapshot};
use rk_store::Store;
use rk_testkit::*;

fn baseline() -> Snapshot {
    Snapshot::new(t(0), vec![active("A", "snap-a", t(0))])
}

#[tokio::test]
async fn gap_past_timeout_forces_resync_and_clears_tracker() {
    let mut h = Harness::new(ScriptedSnapshotSource::new(baseline()), fast_config(0, 900));
    assert!(matches!(
        h.controller.resync_now(ResyncTrigger::Startup).await,
        TickOutcome::Resynced(_)
    ));

    for (i, seq) in [1, 2, 3, 7].into_iter().enumerate() {
        h.processor.handle(&event(&format!("K{i}"), Some(seq), "x"));
    }

    let gaps: Vec<i64> = h.ctx.tracker().gaps().iter().map(|g| g.id.get()).collect();
    assert_eq!(gaps, vec![4, 5, 6]);
    assert_eq!(h.ctx.tracker().last_seen(), Some(SequenceId(7)));

    match h.controller.tick().await {
        TickOutcome::Resynced(report) => {
            assert_eq!(report.trigger, ResyncTrigger::MissedMessages);
            assert_eq!(report.attempts, 1);
        }
        other => panic!("expected resync, got {other:?}"),
    }

    assert!(h.ctx.gate().is_valid());
    assert_eq!(h.ctx.tracker().gap_count(), 0);
    assert_eq!(h.ctx.tracker().last_seen(), None);
    // The reload replaced the store contents with the snapshot.
    assert_eq!(h.store.len(), 1);
    assert!(h.store.inner().get("A").is_some());

    let out = h.processor.handle(&event("K9", Some(500), "x"));
    assert!(matches!(
        out,
        HandleOutcome::Processed {
            observation: Some(Observation::First),
            ..
        }
    ));
}

#[tokio::test]
async fn late_arrivals_inside_timeout_avoid_resync() {
    let mut h = Harness::new(ScriptedSnapshotSource::new(baseline()), fast_config(60, 900));
    h.controller.resync_now(ResyncTrigger::Startup).await;

    h.processor.handle(&event("A", Some(1), "1"));
    h.processor.handle(&event("A", Some(3), "3"));
    assert_eq!(h.ctx.tracker().gap_count(), 1);

    h.advance(30);
    h.processor.handle(&event("B", Some(2), "2"));
    assert_eq!(h.ctx.tracker().gap_count(), 0);

    h.advance(60);
    h.processor.handle(&event("B", Some(4), "4"));
    assert_eq!(h.controller.tick().await, TickOutcome::NoAction);
    assert_eq!(h.ctx.counters().snapshot().resyncs, 1);
    assert_eq!(h.source.fetches(), 1);
}
