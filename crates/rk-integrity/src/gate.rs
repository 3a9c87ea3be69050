use crate::{InvalidReason, ValidityState};
use rk_schemas::Record;
use rk_store::{Store, StoreError};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, info, warn};

/// Result of [`ReplicaValidityGate::apply_or_buffer`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GateOutcome {
    Applied,
    Buffered,
    /// The store refused the write; the gate is now invalid.
    ApplyFailed,
}

/// Validity flag plus the write policy in front of the store.
///
/// `apply_or_buffer` holds the read lock across its decision and the store
/// call. Transitions take the write lock, so once `invalidate` returns no record
/// is applied directly, and once `revalidate_after_resync` has drained the
/// pending buffer nothing more lands in it.
pub struct ReplicaValidityGate {
    state: RwLock<ValidityState>,
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for ReplicaValidityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaValidityGate")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ReplicaValidityGate {
    /// Starts `Invalid { BootDefault }` and mirrors that onto the store.
    pub fn new(store: Arc<dyn Store>) -> Self {
        store.set_invalid();
        Self {
            state: RwLock::new(ValidityState::boot()),
            store,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ValidityState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ValidityState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_valid(&self) -> bool {
        self.read().is_valid()
    }

    pub fn state(&self) -> ValidityState {
        *self.read()
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Transition to `Invalid { reason }`. Returns `true` only for the call that
    /// actually performed the transition.
    pub fn invalidate(&self, reason: InvalidReason) -> bool {
        let mut st = self.write();
        if !st.is_valid() {
            return false;
        }
        *st = ValidityState::Invalid { reason };
        self.store.set_invalid();
        warn!(reason = %reason, "replica invalidated");
        true
    }

    pub fn apply_or_buffer(&self, record: Record) -> GateOutcome {
        let err = {
            let st = self.read();
            if !st.is_valid() {
                self.store.buffer(record);
                return GateOutcome::Buffered;
            }
            let key = record.key.clone();
            match self.store.apply(record) {
                Ok(()) => return GateOutcome::Applied,
                Err(e) => (key, e),
            }
        };

        let (key, e) = err;
        error!(key = %key, error = %e, "store apply failed");
        self.invalidate(InvalidReason::ApplyFailed);
        GateOutcome::ApplyFailed
    }

    /// Called by the controller once a full resync has loaded the store.
    ///
    /// The store drains its pending buffer as part of becoming valid. If that
    /// drain fails the gate stays `Invalid { ApplyFailed }` and the error is
    /// returned.
    pub fn revalidate_after_resync(&self) -> Result<usize, StoreError> {
        let mut st = self.write();
        match self.store.set_valid() {
            Ok(replayed) => {
                *st = ValidityState::Valid;
                info!(replayed, "replica revalidated");
                Ok(replayed)
            }
            Err(e) => {
                *st = ValidityState::Invalid {
                    reason: InvalidReason::ApplyFailed,
                };
                self.store.set_invalid();
                error!(error = %e, "pending replay failed; replica stays invalid");
                Err(e)
            }
        }
    }
}
