//! rk-integrity
//!
//! Sequence gap tracking and the replica validity gate.
//!
//! - A gap is any id skipped by a forward jump. It is tracked with its discovery
//!   time and resolved if the id arrives late.
//! - The store starts untrusted on every boot. Only a completed resync makes it
//!   valid; any trigger or failed apply makes it invalid again.
//! - Records are never dropped while invalid; they are buffered for replay.
//!
//! Deterministic logic. No IO, no wall-clock: callers pass `now`.

mod gate;
mod tracker;
mod validity;

pub use gate::{GateOutcome, ReplicaValidityGate};
pub use tracker::{Observation, SequenceGapTracker, DEFAULT_MAX_GAP_SPAN};
pub use validity::{InvalidReason, ValidityState};
