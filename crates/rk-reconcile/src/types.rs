use rk_schemas::RecordStatus;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// One differing field on a record present on both sides.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct FieldDrift {
    pub field: String,
    pub local: String,
    pub snapshot: String,
}

impl FieldDrift {
    pub fn new(field: &str, local: impl Into<String>, snapshot: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            local: local.into(),
            snapshot: snapshot.into(),
        }
    }
}

/// Why a key was reported.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MismatchDetail {
    /// The snapshot has the record, the store does not.
    MissingLocally { snapshot_status: RecordStatus },

    /// The store holds a non-terminal record the snapshot does not know about,
    /// and the record predates the snapshot.
    UnexpectedLocally { local_status: RecordStatus },

    /// Present on both sides with differing fields.
    FieldDrift { fields: Vec<FieldDrift> },
}

impl fmt::Display for MismatchDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MismatchDetail::MissingLocally { snapshot_status } => {
                write!(f, "missing locally (snapshot status={snapshot_status})")
            }
            MismatchDetail::UnexpectedLocally { local_status } => {
                write!(f, "not in snapshot (local status={local_status})")
            }
            MismatchDetail::FieldDrift { fields } => {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|d| format!("{}: local={} snapshot={}", d.field, d.local, d.snapshot))
                    .collect();
                write!(f, "drift [{}]", parts.join("; "))
            }
        }
    }
}

/// Result of one validation pass. Keys are ordered for stable logs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub snapshot_records: usize,
    pub local_records: usize,
    /// Local records skipped because they were received after the snapshot's `as_of`.
    pub skipped_newer_locally: usize,
    pub mismatches: BTreeMap<String, MismatchDetail>,
}

impl ValidationReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn mismatch_count(&self) -> usize {
        self.mismatches.len()
    }

    /// `{key:detail, ...}` rendering capped at `max` entries, for log lines.
    pub fn preview(&self, max: usize) -> String {
        let mut parts: Vec<String> = self
            .mismatches
            .iter()
            .take(max)
            .map(|(k, d)| format!("{k}:{d}"))
            .collect();
        if self.mismatches.len() > max {
            parts.push(format!("... +{} more", self.mismatches.len() - max));
        }
        format!("{{{}}}", parts.join(", "))
    }
}
