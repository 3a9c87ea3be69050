//! Replica validity with fail-closed boot semantics
//!
//! # Invariants
//!
//! - **Boot is always invalid**: a freshly started process has no evidence the
//!   store matches upstream, whatever it held before the restart.
//! - **Only a resync validates**: there is no other path from `Invalid` to `Valid`.
//! - **The first reason wins**: invalidating an already-invalid replica keeps the
//!   original reason so the cause stays visible until the next resync.

use serde::Serialize;
use std::fmt;

/// Why the replica is not trusted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    /// Process start; no resync has completed yet.
    BootDefault,
    /// A tracked gap outlived the missed-message timeout.
    MissedMessages,
    /// No event arrived within the stale-message timeout.
    StaleStream,
    /// The store refused a write, or replaying the pending buffer failed.
    ApplyFailed,
    /// Operator request.
    Manual,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::BootDefault => "boot_default",
            InvalidReason::MissedMessages => "missed_messages",
            InvalidReason::StaleStream => "stale_stream",
            InvalidReason::ApplyFailed => "apply_failed",
            InvalidReason::Manual => "manual",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValidityState {
    Valid,
    Invalid { reason: InvalidReason },
}

impl ValidityState {
    /// Fail-closed starting state.
    pub fn boot() -> Self {
        ValidityState::Invalid {
            reason: InvalidReason::BootDefault,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidityState::Valid)
    }

    pub fn invalid_reason(&self) -> Option<InvalidReason> {
        match self {
            ValidityState::Valid => None,
            ValidityState::Invalid { reason } => Some(*reason),
        }
    }
}

impl Default for ValidityState {
    fn default() -> Self {
        Self::boot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_is_invalid() {
        let st = ValidityState::boot();
        assert!(!st.is_valid());
        assert_eq!(st.invalid_reason(), Some(InvalidReason::BootDefault));
        assert_eq!(ValidityState::default(), st);
    }

    #[test]
    fn reason_strings_are_snake_case() {
        assert_eq!(InvalidReason::MissedMessages.to_string(), "missed_messages");
        assert_eq!(ValidityState::Valid.invalid_reason(), None);
    }
}
