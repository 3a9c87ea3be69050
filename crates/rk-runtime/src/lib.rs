//! rk-runtime
//!
//! Wires the tracker, the validity gate and the store into the two paths that
//! keep a replica consistent:
//!
//! - [`StreamEventProcessor`]: per-event entry point for the transport.
//! - [`ReconciliationController`]: periodic loop that forces resyncs and runs
//!   scheduled validation.
//!
//! Both share one [`SyncContext`]. Snapshot retrieval sits behind
//! [`SnapshotSource`]; [`HttpSnapshotSource`] is the reference implementation.

mod clock;
mod context;
mod controller;
mod decoder;
mod processor;
mod resync;
mod snapshot;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{CountersSnapshot, ResyncPermit, SyncContext, SyncCounters, SyncStatus};
pub use controller::{ControllerConfig, ReconciliationController, TickOutcome};
pub use decoder::{EventDecoder, MalformedEvent, MetadataDecoder};
pub use processor::{HandleOutcome, StreamEventProcessor};
pub use resync::{retry_until_ok, ResyncReport, ResyncTrigger};
pub use snapshot::{HttpSnapshotSource, SnapshotSource};
