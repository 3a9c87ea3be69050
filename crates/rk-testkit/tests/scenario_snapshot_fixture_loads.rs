//! Scenario: snapshot fixtures load from JSON files
//!
//! GREEN when:
//! - A fixture with sequenced and unsequenced records decodes.
//! - A malformed fixture is an error naming the step that failed.

use rk_schemas::{RecordStatus, SequenceId};
use rk_testkit::load_snapshot_json;
use std::io::Write;

#[test]
fn fixture_round_trips_through_file() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    write!(
        f,
        r#"{{
            "as_of": "2024-03-01T00:00:00Z",
            "records": [
                {{"key": "A", "sequence_id": 4, "status": "active", "payload": "a",
                  "received_at": "2024-03-01T00:00:00Z"}},
                {{"key": "B", "status": "expired", "payload": "",
                  "received_at": "2024-03-01T00:00:00Z"}}
            ]
        }}"#
    )
    .unwrap();

    let snap = load_snapshot_json(f.path().to_str().unwrap()).unwrap();
    assert_eq!(snap.len(), 2);
    assert_eq!(snap.records[0].sequence_id, Some(SequenceId(4)));
    assert_eq!(snap.records[1].status, RecordStatus::Expired);
    assert!(snap.records[1].sequence_id.is_none());
}

#[test]
fn malformed_fixture_is_an_error() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    write!(f, "{{not json").unwrap();
    let err = load_snapshot_json(f.path().to_str().unwrap()).unwrap_err();
    assert!(format!("{err:#}").contains("parse snapshot json"));
}
