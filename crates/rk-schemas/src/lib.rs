//! rk-schemas
//!
//! Shared data shapes passed between the stream path, the reconciliation
//! controller and the store. No behaviour beyond small constructors and
//! predicates lives here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Upstream-assigned sequence identifier.
///
/// Dense and increasing by exactly one per event on the happy path. Not unique
/// across resyncs: a full reload conceptually restarts the sequence.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceId(pub i64);

impl SequenceId {
    pub fn new(v: i64) -> Self {
        Self(v)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for SequenceId {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Domain status of a record. The consistency core never branches on it;
/// only the store's purge does.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Active,
    Cancelled,
    Expired,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Cancelled => "cancelled",
            RecordStatus::Expired => "expired",
        }
    }

    /// Case-insensitive parse. Accepts the US spelling `canceled` as well.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Some(RecordStatus::Active),
            "cancelled" | "canceled" => Some(RecordStatus::Cancelled),
            "expired" => Some(RecordStatus::Expired),
            _ => None,
        }
    }

    /// `true` for statuses the store may purge regardless of expiry time.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecordStatus::Active)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of upstream data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Identity of the record inside the store.
    pub key: String,
    /// `None` for snapshot records and for events that carried no sequence id.
    pub sequence_id: Option<SequenceId>,
    pub status: RecordStatus,
    pub payload: String,
    pub received_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(
        key: impl Into<String>,
        status: RecordStatus,
        payload: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            sequence_id: None,
            status,
            payload: payload.into(),
            received_at,
            expires_at: None,
        }
    }

    pub fn with_sequence_id(mut self, id: SequenceId) -> Self {
        self.sequence_id = Some(id);
        self
    }

    pub fn with_expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// A record is obsolete once its status is terminal or its expiry has passed.
    pub fn is_obsolete_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_terminal() || self.expires_at.map(|e| e <= now).unwrap_or(false)
    }
}

/// A sequence identifier believed skipped, with the time the gap was first seen.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedGap {
    pub id: SequenceId,
    pub discovered_at: DateTime<Utc>,
}

impl TrackedGap {
    pub fn new(id: SequenceId, discovered_at: DateTime<Utc>) -> Self {
        Self { id, discovered_at }
    }

    /// Age relative to `now`. A `now` earlier than discovery yields zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.discovered_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// `true` once the gap has had `threshold` to arrive late and has not.
    pub fn is_matured(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) >= threshold
    }
}

/// Raw message as delivered by the transport, before normalization.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
    /// Upstream publish time, when the transport provides one. Used for latency logs.
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl StreamEvent {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            metadata: BTreeMap::new(),
            body: body.into(),
            published_at: None,
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_published_at(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }
}

/// One full fetch from the authoritative snapshot source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Point in time the source claims the snapshot reflects.
    pub as_of: DateTime<Utc>,
    pub records: Vec<Record>,
}

impl Snapshot {
    pub fn new(as_of: DateTime<Utc>, records: Vec<Record>) -> Self {
        Self { as_of, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
