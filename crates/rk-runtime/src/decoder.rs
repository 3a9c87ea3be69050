use chrono::{DateTime, Utc};
use rk_config::MetadataKeys;
use rk_schemas::{Record, RecordStatus, SequenceId, StreamEvent};
use std::fmt;

/// An event that could not be normalized into a [`Record`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MalformedEvent {
    pub reason: String,
}

impl MalformedEvent {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for MalformedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed event: {}", self.reason)
    }
}

impl std::error::Error for MalformedEvent {}

/// Normalizes a raw transport event into a store record.
///
/// The record's `sequence_id` is the tracker input; `None` means the event is
/// processed without gap tracking.
pub trait EventDecoder: Send + Sync {
    fn decode(&self, event: &StreamEvent, received_at: DateTime<Utc>)
        -> Result<Record, MalformedEvent>;
}

/// Reads identity, sequence, status and expiry from event metadata; the body is the payload.
#[derive(Clone, Debug, Default)]
pub struct MetadataDecoder {
    keys: MetadataKeys,
}

impl MetadataDecoder {
    pub fn new(keys: MetadataKeys) -> Self {
        Self { keys }
    }
}

impl EventDecoder for MetadataDecoder {
    fn decode(
        &self,
        event: &StreamEvent,
        received_at: DateTime<Utc>,
    ) -> Result<Record, MalformedEvent> {
        let sequence_id = match event.meta(&self.keys.sequence_key) {
            None => None,
            Some(raw) => Some(raw.trim().parse::<i64>().map(SequenceId).map_err(|_| {
                MalformedEvent::new(format!(
                    "{}={raw:?} is not an integer",
                    self.keys.sequence_key
                ))
            })?),
        };

        let key = event
            .meta(&self.keys.record_key)
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| MalformedEvent::new(format!("missing {}", self.keys.record_key)))?;

        let status = match event.meta(&self.keys.status_key) {
            None => RecordStatus::Active,
            Some(raw) => RecordStatus::parse(raw).ok_or_else(|| {
                MalformedEvent::new(format!("{}={raw:?} is not a known status", self.keys.status_key))
            })?,
        };

        let expires_at = match event.meta(&self.keys.expires_key) {
            None => None,
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw.trim())
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| {
                        MalformedEvent::new(format!("{}={raw:?}: {e}", self.keys.expires_key))
                    })?,
            ),
        };

        let mut record = Record::new(key, status, event.body.clone(), received_at);
        record.sequence_id = sequence_id;
        record.expires_at = expires_at;
        Ok(record)
    }
}
