use crate::context::{SyncContext, SyncCounters};
use crate::decoder::EventDecoder;
use rk_integrity::{GateOutcome, Observation};
use rk_schemas::StreamEvent;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What `handle` did with one event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Normalized and handed to the gate. `observation` is `None` for events
    /// without a sequence id.
    Processed {
        observation: Option<Observation>,
        gate: GateOutcome,
    },
    /// Could not be normalized; logged and dropped without touching the tracker.
    Malformed,
}

/// Per-event entry point for the transport listener.
///
/// Cheap to clone; every clone shares the same context. `handle` never returns
/// an error: failures are logged, counted, and reflected in validity.
#[derive(Clone)]
pub struct StreamEventProcessor {
    ctx: Arc<SyncContext>,
    decoder: Arc<dyn EventDecoder>,
}

impl StreamEventProcessor {
    pub fn new(ctx: Arc<SyncContext>, decoder: Arc<dyn EventDecoder>) -> Self {
        Self { ctx, decoder }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    pub fn handle(&self, event: &StreamEvent) -> HandleOutcome {
        let now = self.ctx.now();
        self.ctx.mark_received(now);
        let counters = self.ctx.counters();
        SyncCounters::bump(&counters.received);

        let record = match self.decoder.decode(event, now) {
            Ok(r) => r,
            Err(e) => {
                SyncCounters::bump(&counters.malformed);
                warn!(error = %e, metadata = ?event.metadata, "dropping malformed event");
                return HandleOutcome::Malformed;
            }
        };

        if let Some(published) = event.published_at {
            debug!(
                key = %record.key,
                latency_ms = (now - published).num_milliseconds(),
                "event delivery latency"
            );
        }

        let observation = match record.sequence_id {
            None => {
                SyncCounters::bump(&counters.unsequenced);
                debug!(key = %record.key, "event without sequence id; gap tracking skipped");
                None
            }
            Some(seq) => {
                let obs = self.ctx.tracker().observe(seq, now);
                match obs {
                    Observation::GapOpened { missing, tracked } => {
                        warn!(seq = %seq, missing, tracked, "sequence gap opened");
                    }
                    Observation::LateArrival => {
                        info!(seq = %seq, "late arrival resolved a tracked gap");
                    }
                    Observation::Duplicate => {
                        debug!(seq = %seq, "duplicate or re-delivered sequence id");
                    }
                    Observation::First | Observation::InOrder => {}
                }
                Some(obs)
            }
        };

        let gate = self.ctx.gate().apply_or_buffer(record);
        match gate {
            GateOutcome::Applied => SyncCounters::bump(&counters.applied),
            GateOutcome::Buffered => SyncCounters::bump(&counters.buffered),
            GateOutcome::ApplyFailed => SyncCounters::bump(&counters.apply_failures),
        }

        HandleOutcome::Processed { observation, gate }
    }
}
