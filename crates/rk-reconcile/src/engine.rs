use crate::{FieldDrift, MismatchDetail, ValidationReport};
use chrono::{DateTime, Utc};
use rk_schemas::{Record, Snapshot};
use std::collections::BTreeMap;

fn fmt_expiry(e: Option<DateTime<Utc>>) -> String {
    e.map(|t| t.to_rfc3339()).unwrap_or_else(|| "none".to_string())
}

fn compare_records(local: &Record, snap: &Record) -> Vec<FieldDrift> {
    let mut fields = Vec::new();

    if local.status != snap.status {
        fields.push(FieldDrift::new(
            "status",
            local.status.as_str(),
            snap.status.as_str(),
        ));
    }

    // Payloads can be large; report lengths, not content.
    if local.payload != snap.payload {
        fields.push(FieldDrift::new(
            "payload",
            format!("{} bytes", local.payload.len()),
            format!("{} bytes", snap.payload.len()),
        ));
    }

    if local.expires_at != snap.expires_at {
        fields.push(FieldDrift::new(
            "expires_at",
            fmt_expiry(local.expires_at),
            fmt_expiry(snap.expires_at),
        ));
    }

    fields
}

/// Diff the store's contents against an authoritative snapshot.
///
/// - Snapshot key absent locally => `MissingLocally`
/// - Both present, fields differ => `FieldDrift`
/// - Local non-terminal key absent from snapshot => `UnexpectedLocally`
///
/// Local records received after `snapshot.as_of` are newer than the snapshot
/// and are skipped on both sides of the comparison.
pub fn validate(local: &BTreeMap<String, Record>, snapshot: &Snapshot) -> ValidationReport {
    let mut mismatches: BTreeMap<String, MismatchDetail> = BTreeMap::new();
    let mut skipped = 0usize;

    let mut snap_by_key: BTreeMap<&str, &Record> = BTreeMap::new();
    for r in &snapshot.records {
        snap_by_key.insert(r.key.as_str(), r);
    }

    // 1) Snapshot -> local
    for (key, snap) in &snap_by_key {
        match local.get(*key) {
            None => {
                mismatches.insert(
                    key.to_string(),
                    MismatchDetail::MissingLocally {
                        snapshot_status: snap.status,
                    },
                );
            }
            Some(loc) if loc.received_at > snapshot.as_of => skipped += 1,
            Some(loc) => {
                let fields = compare_records(loc, snap);
                if !fields.is_empty() {
                    mismatches.insert(key.to_string(), MismatchDetail::FieldDrift { fields });
                }
            }
        }
    }

    // 2) Local -> snapshot
    for (key, loc) in local {
        if snap_by_key.contains_key(key.as_str()) {
            continue;
        }
        if loc.received_at > snapshot.as_of {
            skipped += 1;
            continue;
        }
        // Terminal records are retained until purge; upstream may already have dropped them.
        if loc.status.is_terminal() {
            continue;
        }
        mismatches.insert(
            key.clone(),
            MismatchDetail::UnexpectedLocally {
                local_status: loc.status,
            },
        );
    }

    ValidationReport {
        snapshot_records: snapshot.records.len(),
        local_records: local.len(),
        skipped_newer_locally: skipped,
        mismatches,
    }
}

pub fn is_consistent(local: &BTreeMap<String, Record>, snapshot: &Snapshot) -> bool {
    validate(local, snapshot).is_consistent()
}
