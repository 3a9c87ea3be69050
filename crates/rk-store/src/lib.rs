//! rk-store
//!
//! The record store contract the consistency core drives, plus an in-memory
//! reference implementation.
//!
//! # Contract
//!
//! - `apply` writes one record. Failure is a correctness risk; the caller
//!   invalidates and resyncs rather than retrying in place.
//! - `buffer` appends to a FIFO pending buffer and cannot fail.
//! - `set_valid` drains the pending buffer **in receipt order** against the
//!   current contents, then marks the store valid.
//! - `load_from_snapshot` replaces the store's contents wholesale. It must not
//!   touch the pending buffer: records buffered during a resync are replayed
//!   on top of the freshly loaded baseline.

mod memory;

pub use memory::MemoryStore;

use chrono::{DateTime, Utc};
use rk_reconcile::ValidationReport;
use rk_schemas::{Record, Snapshot};

/// Errors surfaced by a [`Store`].
#[derive(Debug)]
pub enum StoreError {
    /// The record itself is unacceptable (e.g. empty key).
    Rejected { key: String, reason: String },

    /// Inserting would exceed the configured record capacity.
    CapacityExceeded { capacity: usize },

    /// Storage backend failure.
    Backend(String),

    /// Replaying the pending buffer stopped at `failed_key`; the records after it
    /// are still buffered.
    DrainFailed {
        replayed: usize,
        failed_key: String,
        cause: Box<StoreError>,
    },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Rejected { key, reason } => {
                write!(f, "record rejected: key={key:?} reason={reason}")
            }
            StoreError::CapacityExceeded { capacity } => {
                write!(f, "store capacity exceeded: max_records={capacity}")
            }
            StoreError::Backend(msg) => write!(f, "store backend error: {msg}"),
            StoreError::DrainFailed {
                replayed,
                failed_key,
                cause,
            } => write!(
                f,
                "pending drain failed after {replayed} record(s) at key={failed_key:?}: {cause}"
            ),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::DrainFailed { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

/// Locally materialized record store.
///
/// Implementations synchronize internally; every method takes `&self` and may be
/// called concurrently from the stream path and the controller.
pub trait Store: Send + Sync {
    fn is_valid(&self) -> bool;

    fn set_invalid(&self);

    /// Replay the pending buffer in receipt order, then mark valid.
    /// Returns the number of records replayed. On error the store stays invalid.
    fn set_valid(&self) -> Result<usize, StoreError>;

    fn apply(&self, record: Record) -> Result<(), StoreError>;

    fn buffer(&self, record: Record);

    fn pending_len(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the store's contents. Returns the number of records loaded.
    fn load_from_snapshot(&self, records: Vec<Record>) -> Result<usize, StoreError>;

    fn diff_against_snapshot(&self, snapshot: &Snapshot) -> Result<ValidationReport, StoreError>;

    /// Remove expired / obsolete records. Returns the count removed.
    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}
