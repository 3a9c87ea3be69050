//! rk-reconcile
//!
//! Snapshot cross-check for the local record store.
//!
//! - `validate` diffs the store's contents against an authoritative snapshot and
//!   reports per-key mismatches. The report is advisory: nothing here flips
//!   validity.
//! - `SnapshotWatermark` refuses snapshots older than the last one loaded.
//!
//! Deterministic, pure logic. No IO, no clock.

mod engine;
mod types;
pub mod watermark;

pub use engine::{is_consistent, validate};
pub use types::*;
pub use watermark::{SnapshotFreshness, SnapshotWatermark, StaleSnapshot};
