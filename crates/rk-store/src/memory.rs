use crate::{Store, StoreError};
use chrono::{DateTime, Utc};
use rk_reconcile::ValidationReport;
use rk_schemas::{Record, Snapshot};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory [`Store`] keyed by `Record::key`.
///
/// - Upsert by key. A re-delivery whose sequence id is lower than the stored
///   record's is ignored.
/// - Optional `max_records` capacity makes `apply` fail once full.
/// - Records and the pending buffer sit behind separate locks so buffering
///   never waits on a snapshot load.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, Record>>,
    pending: Mutex<VecDeque<Record>>,
    valid: AtomicBool,
    max_records: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_records(max_records: usize) -> Self {
        Self {
            max_records: Some(max_records),
            ..Self::default()
        }
    }

    pub fn get(&self, key: &str) -> Option<Record> {
        lock(&self.records).get(key).cloned()
    }

    /// Point-in-time copy of the contents.
    pub fn records(&self) -> BTreeMap<String, Record> {
        lock(&self.records).clone()
    }

    /// Point-in-time copy of the pending buffer, oldest first.
    pub fn pending(&self) -> Vec<Record> {
        lock(&self.pending).iter().cloned().collect()
    }

    fn upsert(&self, record: Record) -> Result<(), StoreError> {
        if record.key.trim().is_empty() {
            return Err(StoreError::Rejected {
                key: record.key,
                reason: "empty key".to_string(),
            });
        }

        let mut records = lock(&self.records);
        match records.get(&record.key) {
            Some(existing) => {
                if let (Some(have), Some(got)) = (existing.sequence_id, record.sequence_id) {
                    if got < have {
                        debug!(key = %record.key, have = %have, got = %got, "ignoring stale re-delivery");
                        return Ok(());
                    }
                }
            }
            None => {
                if let Some(cap) = self.max_records {
                    if records.len() >= cap {
                        return Err(StoreError::CapacityExceeded { capacity: cap });
                    }
                }
            }
        }
        records.insert(record.key.clone(), record);
        Ok(())
    }
}

impl Store for MemoryStore {
    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn set_invalid(&self) {
        self.valid.store(false, Ordering::Release);
    }

    fn set_valid(&self) -> Result<usize, StoreError> {
        let mut replayed = 0usize;
        loop {
            let next = lock(&self.pending).pop_front();
            let Some(record) = next else {
                break;
            };
            let key = record.key.clone();
            if let Err(cause) = self.upsert(record) {
                // The failing record is dropped; the reload that follows is the
                // authority for it. Everything behind it stays buffered.
                error!(key = %key, replayed, error = %cause, "pending replay failed");
                return Err(StoreError::DrainFailed {
                    replayed,
                    failed_key: key,
                    cause: Box::new(cause),
                });
            }
            replayed += 1;
        }
        self.valid.store(true, Ordering::Release);
        Ok(replayed)
    }

    fn apply(&self, record: Record) -> Result<(), StoreError> {
        self.upsert(record)
    }

    fn buffer(&self, record: Record) {
        lock(&self.pending).push_back(record);
    }

    fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    fn len(&self) -> usize {
        lock(&self.records).len()
    }

    fn load_from_snapshot(&self, records: Vec<Record>) -> Result<usize, StoreError> {
        let mut fresh: BTreeMap<String, Record> = BTreeMap::new();
        for r in records {
            if r.key.trim().is_empty() {
                return Err(StoreError::Rejected {
                    key: r.key,
                    reason: "empty key in snapshot".to_string(),
                });
            }
            fresh.insert(r.key.clone(), r);
        }
        if let Some(cap) = self.max_records {
            if fresh.len() > cap {
                return Err(StoreError::CapacityExceeded { capacity: cap });
            }
        }

        let loaded = fresh.len();
        *lock(&self.records) = fresh;
        Ok(loaded)
    }

    fn diff_against_snapshot(&self, snapshot: &Snapshot) -> Result<ValidationReport, StoreError> {
        let records = lock(&self.records);
        Ok(rk_reconcile::validate(&records, snapshot))
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut records = lock(&self.records);
        let before = records.len();
        records.retain(|_, r| !r.is_obsolete_at(now));
        Ok(before - records.len())
    }
}
